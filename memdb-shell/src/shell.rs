use crate::command::Command;
use memdb::collection::{Document, Selector};
use memdb::connection::AutoConnection;
use memdb::errors::{ErrorKind, MemDbError, MemDbResult};
use serde_json::Value as Json;

/// Evaluates shell commands against an [AutoConnection]. Every command runs
/// in its own transaction, so a failed command leaves no partial changes.
pub struct Shell {
    autoconn: AutoConnection,
    last: Json,
}

impl Shell {
    pub fn new(autoconn: AutoConnection) -> Self {
        Shell {
            autoconn,
            last: Json::Null,
        }
    }

    pub fn last(&self) -> &Json {
        &self.last
    }

    pub fn execute(&mut self, command: Command) -> MemDbResult<Json> {
        let result = match command {
            Command::LastResult => return Ok(self.last.clone()),
            Command::Help | Command::Exit | Command::Empty | Command::Commit | Command::Rollback => {
                return Ok(Json::Null)
            }
            Command::Find {
                collection,
                selector,
            } => {
                let selector = to_selector(&selector)?;
                let collection = self.autoconn.collection(&collection);
                let found = self
                    .autoconn
                    .transaction(|_| collection.find(selector), None)?;
                Json::Array(found.iter().map(Document::to_json).collect())
            }
            Command::Insert {
                collection,
                documents,
            } => {
                let documents = to_documents(&documents)?;
                let collection = self.autoconn.collection(&collection);
                let ids = self
                    .autoconn
                    .transaction(|_| collection.insert_many(documents), None)?;
                Json::Array(ids.into_iter().map(Json::String).collect())
            }
            Command::Update {
                collection,
                selector,
                modifier,
            } => {
                let selector = to_selector(&selector)?;
                let modifier = Document::from_json(&modifier)?;
                let collection = self.autoconn.collection(&collection);
                let count = self
                    .autoconn
                    .transaction(|_| collection.update(selector, modifier), None)?;
                Json::from(count)
            }
            Command::Remove {
                collection,
                selector,
            } => {
                let selector = to_selector(&selector)?;
                let collection = self.autoconn.collection(&collection);
                let count = self
                    .autoconn
                    .transaction(|_| collection.remove(selector), None)?;
                Json::from(count)
            }
        };
        self.last = result.clone();
        Ok(result)
    }

    pub fn close(&self) -> MemDbResult<()> {
        self.autoconn.close()
    }
}

fn to_selector(json: &Json) -> MemDbResult<Selector> {
    match json {
        Json::String(id) => Ok(Selector::from(id.as_str())),
        Json::Number(n) => n
            .as_i64()
            .map(Selector::from)
            .ok_or_else(|| invalid(&format!("Invalid id {}", n))),
        Json::Object(_) => Ok(Selector::from(Document::from_json(json)?)),
        // a previous find result selects its first document
        Json::Array(items) => match items.first().and_then(|d| d.get("_id")) {
            Some(id) => to_selector(id),
            None => Err(invalid("Empty result can not be used as a selector")),
        },
        _ => Err(invalid(&format!("Invalid id or query {}", json))),
    }
}

fn to_documents(json: &Json) -> MemDbResult<Vec<Document>> {
    match json {
        Json::Array(items) => items.iter().map(Document::from_json).collect(),
        Json::Object(_) => Ok(vec![Document::from_json(json)?]),
        _ => Err(invalid("Documents must be an object or an array of objects")),
    }
}

fn invalid(message: &str) -> MemDbError {
    MemDbError::new(message, ErrorKind::ValidationError)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::parse;
    use memdb::collection::{CollectionDefinition, IndexDefinition};
    use memdb::config::ConnectionConfig;
    use memdb::memdb::MemDb;
    use serde_json::json;

    fn run(shell: &mut Shell, line: &str) -> MemDbResult<Json> {
        let command = parse(line, shell.last())?;
        shell.execute(command)
    }

    #[test]
    fn test_shell_commands() {
        let db = MemDb::builder()
            .shard("s1", "127.0.0.1", 39017)
            .collection("player", CollectionDefinition::new(vec![IndexDefinition::new(&["level"])]))
            .open()
            .unwrap();
        let autoconn = db
            .connect(&ConnectionConfig::new("127.0.0.1", 39017).with_idle_timeout(0))
            .unwrap();
        let mut shell = Shell::new(autoconn);

        let ids = run(&mut shell, r#"db.insert(player, [{"_id": "p1", "level": 1}, {"_id": "p2", "level": 2}])"#).unwrap();
        assert_eq!(ids, json!(["p1", "p2"]));

        let found = run(&mut shell, r#"db.find(player, {"level": 2})"#).unwrap();
        assert_eq!(found, json!([{ "_id": "p2", "level": 2 }]));

        let updated = run(&mut shell, r#"db.update(player, _, {"$inc": {"level": 1}})"#).unwrap();
        assert_eq!(updated, json!(1));

        let found = run(&mut shell, r#"db.find(player, "p2")"#).unwrap();
        assert_eq!(found, json!([{ "_id": "p2", "level": 3 }]));
        assert_eq!(run(&mut shell, "_").unwrap(), found);

        assert_eq!(run(&mut shell, r#"db.remove(player, "p1")"#).unwrap(), json!(1));
        assert_eq!(run(&mut shell, r#"db.find(player, "p1")"#).unwrap(), json!([]));

        shell.close().unwrap();
        db.shutdown();
    }

    #[test]
    fn test_failed_command_keeps_last_result() {
        let db = MemDb::builder().shard("s1", "127.0.0.1", 39018).open().unwrap();
        let autoconn = db
            .connect(&ConnectionConfig::new("127.0.0.1", 39018).with_idle_timeout(0))
            .unwrap();
        let mut shell = Shell::new(autoconn);

        run(&mut shell, r#"db.insert(player, {"_id": "p1"})"#).unwrap();
        let err = run(&mut shell, r#"db.insert(player, [{"_id": "p2"}, {"_id": "p1"}])"#).unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::DuplicateKey);
        assert_eq!(shell.last(), &json!(["p1"]));

        // the whole command was rolled back
        assert_eq!(run(&mut shell, r#"db.find(player, "p2")"#).unwrap(), json!([]));
        assert!(run(&mut shell, "db.update(player, true, {})").is_err());

        shell.close().unwrap();
        db.shutdown();
    }
}
