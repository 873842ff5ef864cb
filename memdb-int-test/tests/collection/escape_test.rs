use memdb::collection::Document;
use memdb::common::{escape_field, unescape_field, Value};
use memdb::errors::MemDbError;
use memdb::{doc, val};
use memdb_int_test::test_util::{cleanup, create_test_context, run_test};

fn tricky_names() -> Vec<String> {
    let backslash = '\\';
    vec![
        String::new(),
        "plain".to_string(),
        "$inc".to_string(),
        "a.b.c".to_string(),
        "..$$..".to_string(),
        format!("{}", backslash),
        format!("{}{}", backslash, backslash),
        format!("{}u0024", backslash),
        format!("{}u002e.{}", backslash, backslash),
        format!("$.{}u0024{}", backslash, backslash),
        format!("trailing{}", backslash),
        "unicode ✓ $ 名前.字段".to_string(),
    ]
}

#[test]
fn test_escape_is_a_bijection() {
    let names = tricky_names();
    for name in &names {
        let escaped = escape_field(name);
        assert!(!escaped.contains('$'), "{:?} escaped to {:?}", name, escaped);
        assert!(!escaped.contains('.'), "{:?} escaped to {:?}", name, escaped);
        assert_eq!(&unescape_field(&escaped), name);
    }

    for (i, a) in names.iter().enumerate() {
        for b in names.iter().skip(i + 1) {
            assert_ne!(escape_field(a), escape_field(b), "{:?} and {:?} collide", a, b);
        }
    }
}

#[test]
fn test_reserved_keys_survive_storage() {
    run_test(
        create_test_context,
        |ctx| {
            let autoconn = ctx.auto_connect()?;
            let player = autoconn.collection("player");

            let mut nested = Document::new();
            nested.put("$gold", 10)?;
            nested.put("x.y", "z")?;
            let mut original = doc! { _id: "p1", name: "rain" };
            original.put("$money.total", 100)?;
            original.put("wallet", Value::Document(nested))?;
            for name in tricky_names().into_iter().filter(|n| !n.is_empty()) {
                original.put(name.clone(), name)?;
            }

            let stored = original.clone();
            autoconn.transaction(|_| player.insert(stored), Some("s1"))?;

            let found = autoconn
                .transaction(|_| player.find_by_id("p1"), Some("s2"))?
                .unwrap();
            assert_eq!(found, original);
            assert_eq!(found.get("$money.total"), Some(&val!(100)));
            assert_eq!(found.get_path("wallet.$gold")?, Some(val!(10)));

            let read_only = autoconn.transaction(|_| player.find_read_only("p1"), Some("s1"))?;
            assert_eq!(read_only, vec![original]);

            autoconn.close()
        },
        cleanup,
    )
}

#[test]
fn test_operator_paths_reach_escaped_fields() {
    run_test(
        create_test_context,
        |ctx| {
            let autoconn = ctx.auto_connect()?;
            let player = autoconn.collection("player");

            autoconn.transaction(
                |_| {
                    player.insert(doc! { _id: "p1", stats: { level: 1 } })?;
                    player.update("p1", doc! { "$inc": { "stats.level": 2 } })?;
                    Ok::<_, MemDbError>(())
                },
                Some("s1"),
            )?;

            let found = autoconn
                .transaction(|_| player.find_by_id("p1"), Some("s2"))?
                .unwrap();
            assert_eq!(found.get_path("stats.level")?, Some(val!(3)));
            autoconn.close()
        },
        cleanup,
    )
}
