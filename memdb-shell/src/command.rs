use memdb::errors::{ErrorKind, MemDbError, MemDbResult};
use serde_json::Value as Json;

pub const HELP: &str = "
Command Reference:

    db.find(collection, idOrQuery)
    db.insert(collection, docs)
    db.update(collection, idOrQuery, modifier)
    db.remove(collection, idOrQuery)
    db.commit()
    db.rollback()
    _       last result
    help    show this reference
    exit    leave the shell
";

/// One line typed into the shell.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Help,
    Exit,
    Empty,
    LastResult,
    Find {
        collection: String,
        selector: Json,
    },
    Insert {
        collection: String,
        documents: Json,
    },
    Update {
        collection: String,
        selector: Json,
        modifier: Json,
    },
    Remove {
        collection: String,
        selector: Json,
    },
    /// Every command commits on its own, so there is never anything pending.
    Commit,
    Rollback,
}

/// Parses a shell line. Arguments are JSON; `_` stands for the previous
/// result and a collection name may be written without quotes.
pub fn parse(line: &str, last: &Json) -> MemDbResult<Command> {
    let line = line.trim().trim_end_matches(';').trim();
    match line {
        "" => return Ok(Command::Empty),
        "help" => return Ok(Command::Help),
        "exit" | "quit" => return Ok(Command::Exit),
        "_" => return Ok(Command::LastResult),
        _ => {}
    }

    let call = line
        .strip_prefix("db.")
        .ok_or_else(|| invalid(&format!("Unknown command: {}", line)))?;
    let open = call
        .find('(')
        .ok_or_else(|| invalid(&format!("Expected '(' in {}", line)))?;
    let body = call[open + 1..]
        .strip_suffix(')')
        .ok_or_else(|| invalid(&format!("Expected ')' at the end of {}", line)))?;
    let method = call[..open].trim();
    let args = split_arguments(body)?;

    match (method, args.as_slice()) {
        ("find", [collection, selector]) => Ok(Command::Find {
            collection: collection_name(collection, last)?,
            selector: argument(selector, last)?,
        }),
        ("insert", [collection, documents]) => Ok(Command::Insert {
            collection: collection_name(collection, last)?,
            documents: argument(documents, last)?,
        }),
        ("update", [collection, selector, modifier]) => Ok(Command::Update {
            collection: collection_name(collection, last)?,
            selector: argument(selector, last)?,
            modifier: argument(modifier, last)?,
        }),
        ("remove", [collection, selector]) => Ok(Command::Remove {
            collection: collection_name(collection, last)?,
            selector: argument(selector, last)?,
        }),
        ("commit", []) => Ok(Command::Commit),
        ("rollback", []) => Ok(Command::Rollback),
        ("commit" | "rollback", _) => Err(invalid(&format!("db.{} takes no arguments", method))),
        ("find" | "insert" | "remove", _) => Err(invalid(&format!(
            "db.{} takes 2 arguments, got {}",
            method,
            args.len()
        ))),
        ("update", _) => Err(invalid(&format!("db.update takes 3 arguments, got {}", args.len()))),
        _ => Err(invalid(&format!("Unknown method db.{}", method))),
    }
}

/// Splits a comma separated argument list, ignoring commas nested in
/// brackets or strings.
fn split_arguments(body: &str) -> MemDbResult<Vec<&str>> {
    let mut args = Vec::new();
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escaped = false;
    let mut start = 0;

    for (i, c) in body.char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' | '[' => depth += 1,
            '}' | ']' => depth -= 1,
            ',' if depth == 0 => {
                args.push(body[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
        if depth < 0 {
            return Err(invalid("Unbalanced brackets"));
        }
    }

    if in_string || depth != 0 {
        return Err(invalid("Unterminated argument"));
    }
    let tail = body[start..].trim();
    if !tail.is_empty() || !args.is_empty() {
        args.push(tail);
    }
    Ok(args)
}

fn argument(text: &str, last: &Json) -> MemDbResult<Json> {
    if text == "_" {
        return Ok(last.clone());
    }
    serde_json::from_str(text).map_err(|e| invalid(&format!("Invalid JSON argument {}: {}", text, e)))
}

fn collection_name(text: &str, last: &Json) -> MemDbResult<String> {
    let is_identifier = !text.is_empty()
        && text != "_"
        && text.chars().all(|c| c.is_alphanumeric() || c == '_');
    if is_identifier {
        return Ok(text.to_string());
    }
    match argument(text, last)? {
        Json::String(name) if !name.is_empty() => Ok(name),
        _ => Err(invalid(&format!("Invalid collection name {}", text))),
    }
}

fn invalid(message: &str) -> MemDbError {
    MemDbError::new(message, ErrorKind::ValidationError)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_builtins() {
        assert_eq!(parse("help", &Json::Null).unwrap(), Command::Help);
        assert_eq!(parse("  exit ", &Json::Null).unwrap(), Command::Exit);
        assert_eq!(parse("", &Json::Null).unwrap(), Command::Empty);
        assert_eq!(parse("_", &Json::Null).unwrap(), Command::LastResult);
        assert_eq!(parse("db.commit()", &Json::Null).unwrap(), Command::Commit);
        assert_eq!(parse("db.rollback();", &Json::Null).unwrap(), Command::Rollback);
        assert!(parse("db.commit(1)", &Json::Null).is_err());
    }

    #[test]
    fn test_parse_find() {
        let command = parse(r#"db.find("player", "p1")"#, &Json::Null).unwrap();
        assert_eq!(
            command,
            Command::Find {
                collection: "player".to_string(),
                selector: json!("p1"),
            }
        );

        let command = parse(r#"db.find(player, {"areaId": 1, "name": "a,b"});"#, &Json::Null).unwrap();
        assert_eq!(
            command,
            Command::Find {
                collection: "player".to_string(),
                selector: json!({ "areaId": 1, "name": "a,b" }),
            }
        );
    }

    #[test]
    fn test_parse_update_with_last_result() {
        let last = json!({ "_id": "p1" });
        let command = parse(
            r#"db.update("player", _, {"$inc": {"level": 1}})"#,
            &last,
        )
        .unwrap();
        assert_eq!(
            command,
            Command::Update {
                collection: "player".to_string(),
                selector: last,
                modifier: json!({ "$inc": { "level": 1 } }),
            }
        );
    }

    #[test]
    fn test_parse_insert_array() {
        let command = parse(r#"db.insert(item, [{"_id": "i1"}, {"_id": "i2"}])"#, &Json::Null).unwrap();
        assert_eq!(
            command,
            Command::Insert {
                collection: "item".to_string(),
                documents: json!([{ "_id": "i1" }, { "_id": "i2" }]),
            }
        );
    }

    #[test]
    fn test_parse_errors() {
        assert!(parse("select * from player", &Json::Null).is_err());
        assert!(parse("db.find(player)", &Json::Null).is_err());
        assert!(parse("db.update(player, \"p1\")", &Json::Null).is_err());
        assert!(parse("db.drop(player)", &Json::Null).is_err());
        assert!(parse("db.find(player, {\"a\": 1)", &Json::Null).is_err());
        assert!(parse("db.find(player, {not json})", &Json::Null).is_err());
        assert!(parse("db.find(1, \"p1\")", &Json::Null).is_ok());
        assert!(parse("db.find(\"\", \"p1\")", &Json::Null).is_err());
    }
}
