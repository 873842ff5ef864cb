use crate::collection::{normalize_id, CollectionDefinition, Document, IndexDefinition};
use crate::common::{Value, DOC_ID};
use crate::errors::{ErrorKind, MemDbError, MemDbResult};

/// Selects documents of a collection, either by id or by an equality query.
///
/// A query is answered only when its field set is `{_id}` or exactly the
/// key set of a declared index. Query fields are dotted paths.
#[derive(Clone, Debug, PartialEq)]
pub enum Selector {
    Id(String),
    Query(Document),
}

impl Selector {
    /// Reduces an `{_id: ..}` query to an id lookup and checks the id.
    pub(crate) fn normalize(self) -> MemDbResult<Selector> {
        match self {
            Selector::Id(id) => {
                if id.is_empty() {
                    log::error!("Empty document id in selector");
                    return Err(MemDbError::new("Document id cannot be empty", ErrorKind::InvalidId));
                }
                Ok(Selector::Id(id))
            }
            Selector::Query(query) => {
                if query.size() == 1 {
                    if let Some(id) = query.get(DOC_ID) {
                        return Ok(Selector::Id(normalize_id(id)?));
                    }
                }
                if query.is_empty() {
                    log::error!("Empty query selector");
                    return Err(MemDbError::new(
                        "Query selector must name at least one field",
                        ErrorKind::ValidationError,
                    ));
                }
                Ok(Selector::Query(query))
            }
        }
    }

    /// Field paths named by the selector.
    pub fn fields(&self) -> Vec<String> {
        match self {
            Selector::Id(_) => vec![DOC_ID.to_string()],
            Selector::Query(query) => query.keys(),
        }
    }

    /// Resolves the index that answers this query.
    ///
    /// # Errors
    ///
    /// `IndexNotFound` when the query's field set matches no declared index.
    pub(crate) fn resolve_index<'a>(
        &self,
        collection: &str,
        definition: &'a CollectionDefinition,
    ) -> MemDbResult<Option<&'a IndexDefinition>> {
        match self {
            Selector::Id(_) => Ok(None),
            Selector::Query(_) => {
                let fields = self.fields();
                match definition.index_for(&fields) {
                    Some(index) => Ok(Some(index)),
                    None => {
                        log::error!("No index on {} covers fields {:?}", collection, fields);
                        Err(MemDbError::new(
                            &format!("No index of collection {} matches fields {:?}", collection, fields),
                            ErrorKind::IndexNotFound,
                        ))
                    }
                }
            }
        }
    }

    /// Returns true if `document` satisfies the selector.
    pub fn matches(&self, document: &Document) -> MemDbResult<bool> {
        match self {
            Selector::Id(id) => Ok(document.id() == Some(id.as_str())),
            Selector::Query(query) => {
                for (path, expected) in query.iter() {
                    let actual = if path == DOC_ID {
                        document.get(DOC_ID).cloned()
                    } else {
                        document.get_path(&path)?
                    };
                    if actual.as_ref() != Some(&expected) {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
        }
    }

    /// Builds the seed document an upsert starts from when nothing matches.
    pub(crate) fn seed_document(&self) -> MemDbResult<Document> {
        let mut document = Document::new();
        match self {
            Selector::Id(id) => document.put(DOC_ID, id.as_str())?,
            Selector::Query(query) => {
                for (path, value) in query.iter() {
                    document.set_path(&path, value)?;
                }
            }
        }
        Ok(document)
    }
}

impl From<&str> for Selector {
    fn from(id: &str) -> Self {
        Selector::Id(id.to_string())
    }
}

impl From<String> for Selector {
    fn from(id: String) -> Self {
        Selector::Id(id)
    }
}

impl From<&String> for Selector {
    fn from(id: &String) -> Self {
        Selector::Id(id.clone())
    }
}

impl From<i64> for Selector {
    fn from(id: i64) -> Self {
        Selector::Id(id.to_string())
    }
}

impl From<Document> for Selector {
    fn from(query: Document) -> Self {
        Selector::Query(query)
    }
}

/// Options for a find call.
///
/// The projection is a whitespace separated field list such as
/// `"_id name level"`. `_id` is always part of the result.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FindOptions {
    fields: Option<Vec<String>>,
}

impl FindOptions {
    pub fn new() -> FindOptions {
        FindOptions::default()
    }

    pub fn fields(projection: &str) -> FindOptions {
        let fields: Vec<String> = projection.split_whitespace().map(|s| s.to_string()).collect();
        FindOptions {
            fields: if fields.is_empty() { None } else { Some(fields) },
        }
    }

    pub fn projection(&self) -> Option<&[String]> {
        self.fields.as_deref()
    }

    /// Applies the projection to a document.
    pub fn project(&self, document: Document) -> MemDbResult<Document> {
        let fields = match &self.fields {
            Some(fields) => fields,
            None => return Ok(document),
        };

        let mut projected = Document::new();
        if let Some(id) = document.get(DOC_ID) {
            projected.insert_raw(DOC_ID.to_string(), id.clone());
        }
        for field in fields {
            if field == DOC_ID {
                continue;
            }
            if let Some(value) = document.get_path(field)? {
                projected.set_path(field, value)?;
            }
        }
        Ok(projected)
    }
}

impl From<&str> for FindOptions {
    fn from(projection: &str) -> Self {
        FindOptions::fields(projection)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collection::IndexDefinition;
    use crate::{doc, val};

    fn definition() -> CollectionDefinition {
        CollectionDefinition::new(vec![
            IndexDefinition::new(&["areaId"]),
            IndexDefinition::new(&["deviceType", "deviceId"]).unique(),
        ])
    }

    #[test]
    fn test_id_query_normalizes_to_id() {
        let selector = Selector::from(doc! { _id: 5 }).normalize().unwrap();
        assert_eq!(selector, Selector::Id("5".to_string()));
    }

    #[test]
    fn test_empty_query_rejected() {
        let err = Selector::from(doc! {}).normalize().unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::ValidationError);
        let err = Selector::from("").normalize().unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::InvalidId);
    }

    #[test]
    fn test_resolve_index() {
        let definition = definition();
        let selector = Selector::from(doc! { deviceId: "d", deviceType: 1 });
        let index = selector.resolve_index("player", &definition).unwrap().unwrap();
        assert!(index.is_unique());

        let selector = Selector::from(doc! { name: "rain" });
        let err = selector.resolve_index("player", &definition).unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::IndexNotFound);

        let selector = Selector::from(doc! { areaId: 1, deviceId: "d" });
        assert!(selector.resolve_index("player", &definition).is_err());
    }

    #[test]
    fn test_matches() {
        let player = doc! { _id: "p1", areaId: 2, device: { kind: "ios" } };
        assert!(Selector::from("p1").matches(&player).unwrap());
        assert!(!Selector::from("p2").matches(&player).unwrap());
        assert!(Selector::from(doc! { areaId: 2.0 }).matches(&player).unwrap());
        assert!(!Selector::from(doc! { areaId: 3 }).matches(&player).unwrap());

        let mut nested = Document::new();
        nested.insert_raw("device.kind".to_string(), val!("ios"));
        assert!(Selector::from(nested).matches(&player).unwrap());
    }

    #[test]
    fn test_seed_document() {
        let mut query = Document::new();
        query.insert_raw("a.b".to_string(), val!(1));
        let seed = Selector::from(query).seed_document().unwrap();
        assert_eq!(seed.get_path("a.b").unwrap(), Some(val!(1)));

        let seed = Selector::from("x").seed_document().unwrap();
        assert_eq!(seed.id(), Some("x"));
    }

    #[test]
    fn test_projection() {
        let options = FindOptions::fields("name stats.hp");
        let doc = doc! { _id: "1", name: "rain", level: 3, stats: { hp: 10, mp: 5 } };
        let projected = options.project(doc).unwrap();
        assert_eq!(projected, doc! { _id: "1", name: "rain", stats: { hp: 10 } });
    }

    #[test]
    fn test_empty_projection_keeps_document() {
        let options = FindOptions::fields("   ");
        assert!(options.projection().is_none());
        let doc = doc! { _id: "1", name: "rain" };
        assert_eq!(options.project(doc.clone()).unwrap(), doc);
    }
}
