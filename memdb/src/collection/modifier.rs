use crate::collection::Document;
use crate::common::{Value, DOC_ID, OPERATOR_PREFIX};
use crate::errors::{ErrorKind, MemDbError, MemDbResult};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpdateOperator {
    Set,
    Unset,
    Inc,
    Push,
    AddToSet,
    Pop,
    Pull,
}

impl UpdateOperator {
    fn parse(name: &str) -> MemDbResult<UpdateOperator> {
        match name {
            "$set" => Ok(UpdateOperator::Set),
            "$unset" => Ok(UpdateOperator::Unset),
            "$inc" => Ok(UpdateOperator::Inc),
            "$push" => Ok(UpdateOperator::Push),
            "$addToSet" => Ok(UpdateOperator::AddToSet),
            "$pop" => Ok(UpdateOperator::Pop),
            "$pull" => Ok(UpdateOperator::Pull),
            other => {
                log::error!("Unsupported update operator {}", other);
                Err(MemDbError::new(
                    &format!("Unsupported update operator {}", other),
                    ErrorKind::ValidationError,
                ))
            }
        }
    }
}

/// A parsed update modifier.
///
/// A modifier document is either made entirely of operators (`$set`,
/// `$unset`, `$inc`, `$push`, `$addToSet`, `$pop`, `$pull`) or contains no
/// operator at all, in which case it replaces the stored document while
/// keeping its `_id`.
#[derive(Clone, Debug, PartialEq)]
pub enum Modifier {
    Replace(Document),
    Operators(Vec<(UpdateOperator, String, Value)>),
}

impl Modifier {
    pub fn parse(modifier: &Document) -> MemDbResult<Modifier> {
        let keys = modifier.keys();
        let operator_count = keys.iter().filter(|k| k.starts_with(OPERATOR_PREFIX)).count();

        if operator_count == 0 {
            return Ok(Modifier::Replace(modifier.clone()));
        }
        if operator_count != keys.len() {
            log::error!("Modifier mixes operators and fields: {:?}", keys);
            return Err(MemDbError::new(
                "Modifier cannot mix update operators and plain fields",
                ErrorKind::ValidationError,
            ));
        }

        let mut operations = Vec::new();
        for (name, argument) in modifier.iter() {
            let operator = UpdateOperator::parse(&name)?;
            let argument = match argument {
                Value::Document(doc) => doc,
                other => {
                    log::error!("Argument of {} must be a document, found {}", name, other.type_name());
                    return Err(MemDbError::new(
                        &format!("Argument of {} must be a document", name),
                        ErrorKind::ValidationError,
                    ));
                }
            };
            for (path, value) in argument.iter() {
                if path == DOC_ID || path.starts_with("_id.") {
                    log::error!("Update operator {} cannot modify {}", name, DOC_ID);
                    return Err(MemDbError::new(
                        &format!("{} cannot modify {}", name, DOC_ID),
                        ErrorKind::ValidationError,
                    ));
                }
                operations.push((operator, path, value));
            }
        }
        Ok(Modifier::Operators(operations))
    }

    /// Applies the modifier to `document` and returns the new document.
    ///
    /// The input is left untouched; a failing operator leaves no partial
    /// result behind.
    pub fn apply(&self, document: &Document) -> MemDbResult<Document> {
        match self {
            Modifier::Replace(replacement) => {
                let id = document.get(DOC_ID).cloned();
                if let (Some(new_id), Some(old_id)) = (replacement.get(DOC_ID), id.as_ref()) {
                    if new_id != old_id {
                        log::error!("Replacement changes {} from {} to {}", DOC_ID, old_id, new_id);
                        return Err(MemDbError::new(
                            "Replacement document cannot change _id",
                            ErrorKind::ValidationError,
                        ));
                    }
                }
                let mut updated = replacement.clone();
                if let Some(id) = id {
                    updated.put(DOC_ID, id)?;
                }
                Ok(updated)
            }
            Modifier::Operators(operations) => {
                let mut updated = document.clone();
                for (operator, path, argument) in operations {
                    apply_operator(&mut updated, *operator, path, argument)?;
                }
                Ok(updated)
            }
        }
    }
}

fn apply_operator(
    document: &mut Document,
    operator: UpdateOperator,
    path: &str,
    argument: &Value,
) -> MemDbResult<()> {
    match operator {
        UpdateOperator::Set => document.set_path(path, argument.clone()),
        UpdateOperator::Unset => document.remove_path(path).map(|_| ()),
        UpdateOperator::Inc => {
            if !argument.is_number() {
                return Err(invalid_target(path, "$inc needs a numeric argument"));
            }
            let next = match document.get_path(path)? {
                None | Some(Value::Null) => argument.clone(),
                Some(current) => add_numbers(path, &current, argument)?,
            };
            document.set_path(path, next)
        }
        UpdateOperator::Push | UpdateOperator::AddToSet => match document.get_path_mut(path)? {
            Some(Value::Array(items)) => {
                if operator == UpdateOperator::Push || !items.contains(argument) {
                    items.push(argument.clone());
                }
                Ok(())
            }
            Some(Value::Null) | None => document.set_path(path, Value::Array(vec![argument.clone()])),
            Some(_) => Err(invalid_target(path, "target of array operator is not an array")),
        },
        UpdateOperator::Pop => {
            let from_front = match argument.as_number() {
                Some(n) if n < 0.0 => true,
                Some(_) => false,
                None => return Err(invalid_target(path, "$pop needs 1 or -1")),
            };
            match document.get_path_mut(path)? {
                Some(Value::Array(items)) => {
                    if !items.is_empty() {
                        if from_front {
                            items.remove(0);
                        } else {
                            items.pop();
                        }
                    }
                    Ok(())
                }
                None => Ok(()),
                Some(_) => Err(invalid_target(path, "target of $pop is not an array")),
            }
        }
        UpdateOperator::Pull => match document.get_path_mut(path)? {
            Some(Value::Array(items)) => {
                items.retain(|item| item != argument);
                Ok(())
            }
            None => Ok(()),
            Some(_) => Err(invalid_target(path, "target of $pull is not an array")),
        },
    }
}

fn add_numbers(path: &str, current: &Value, delta: &Value) -> MemDbResult<Value> {
    match (current, delta) {
        (Value::I64(a), Value::I64(b)) => match a.checked_add(*b) {
            Some(sum) => Ok(Value::I64(sum)),
            None => Ok(Value::F64(*a as f64 + *b as f64)),
        },
        (a, b) => match (a.as_number(), b.as_number()) {
            (Some(a), Some(b)) => Ok(Value::F64(a + b)),
            _ => Err(invalid_target(path, "target of $inc is not a number")),
        },
    }
}

fn invalid_target(path: &str, reason: &str) -> MemDbError {
    log::error!("Cannot update field {}: {}", path, reason);
    MemDbError::new(
        &format!("Cannot update field {}: {}", path, reason),
        ErrorKind::ValidationError,
    )
}
