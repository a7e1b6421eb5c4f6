use rbac_gate::{
    MenuTreeAssembler, assemble,
    models::{MenuNode, MenuRecord},
};
use std::collections::HashSet;

fn menu(id: &str, parent: Option<&str>, sequence: i64) -> MenuRecord {
    MenuRecord {
        record_id: id.to_string(),
        name: format!("menu {id}"),
        sequence,
        parent_id: parent.map(str::to_string),
        ..Default::default()
    }
}

fn ids(nodes: &[MenuNode]) -> Vec<&str> {
    nodes.iter().map(|n| n.record.record_id.as_str()).collect()
}

/// Walks the forest, checking each child points at its parent, and collects ids.
fn collect(nodes: &[MenuNode], parent: Option<&str>, seen: &mut Vec<String>) {
    for node in nodes {
        if let Some(parent) = parent {
            assert_eq!(node.record.parent_id.as_deref(), Some(parent));
        }
        seen.push(node.record.record_id.clone());
        collect(&node.children, Some(node.record.record_id.as_str()), seen);
    }
}

#[test]
fn test_roots_and_children_follow_sequence() {
    let records = vec![
        menu("a", None, 2),
        menu("b", Some("a"), 1),
        menu("c", None, 1),
    ];

    let forest = assemble(&records);

    assert_eq!(ids(&forest), vec!["c", "a"]);
    assert!(forest[0].children.is_empty());
    assert_eq!(ids(&forest[1].children), vec!["b"]);
}

#[test]
fn test_empty_input_gives_empty_forest() {
    assert!(assemble(&[]).is_empty());
}

#[test]
fn test_children_listed_before_their_parent_are_still_linked() {
    let records = vec![
        menu("leaf", Some("mid"), 1),
        menu("mid", Some("top"), 1),
        menu("top", None, 1),
    ];

    let forest = assemble(&records);

    assert_eq!(ids(&forest), vec!["top"]);
    assert_eq!(ids(&forest[0].children), vec!["mid"]);
    assert_eq!(ids(&forest[0].children[0].children), vec!["leaf"]);
}

#[test]
fn test_every_record_appears_exactly_once() {
    let records = vec![
        menu("sys", None, 1),
        menu("users", Some("sys"), 3),
        menu("roles", Some("sys"), 2),
        menu("menus", Some("sys"), 1),
        menu("demo", None, 2),
        menu("demo-list", Some("demo"), 1),
        menu("user-edit", Some("users"), 1),
    ];

    let forest = assemble(&records);
    let mut seen = Vec::new();
    collect(&forest, None, &mut seen);

    assert_eq!(seen.len(), records.len());
    let unique: HashSet<_> = seen.iter().collect();
    assert_eq!(unique.len(), records.len());
    assert_eq!(forest.iter().map(MenuNode::node_count).sum::<usize>(), records.len());
    assert_eq!(ids(&forest[0].children), vec!["menus", "roles", "users"]);
}

#[test]
fn test_equal_sequence_keeps_input_order() {
    let records = vec![
        menu("x", None, 5),
        menu("y", None, 5),
        menu("z", None, 5),
        menu("w", None, 1),
    ];

    assert_eq!(ids(&assemble(&records)), vec!["w", "x", "y", "z"]);
}

#[test]
fn test_unresolved_parent_becomes_root() {
    // "hidden" was filtered out upstream, orphaning its child.
    let records = vec![menu("visible", None, 2), menu("child", Some("hidden"), 1)];

    let forest = MenuTreeAssembler::new().strict(true).assemble(&records);

    assert_eq!(ids(&forest), vec!["child", "visible"]);
}

#[test]
fn test_assembly_is_deterministic() {
    let records = vec![
        menu("a", None, 2),
        menu("b", Some("a"), 1),
        menu("c", None, 1),
        menu("d", Some("c"), 1),
        menu("e", Some("c"), 1),
    ];

    assert_eq!(assemble(&records), assemble(&records));
}

#[test]
fn test_parent_cycles_do_not_lose_records() {
    let records = vec![
        menu("root", None, 1),
        menu("self", Some("self"), 2),
        menu("p", Some("q"), 3),
        menu("q", Some("p"), 4),
        menu("under-q", Some("q"), 1),
    ];

    let forest = assemble(&records);
    let mut seen = Vec::new();
    fn walk(nodes: &[MenuNode], seen: &mut Vec<String>) {
        for node in nodes {
            seen.push(node.record.record_id.clone());
            walk(&node.children, seen);
        }
    }
    walk(&forest, &mut seen);

    seen.sort();
    assert_eq!(seen, vec!["p", "q", "root", "self", "under-q"]);
}

#[test]
fn test_leaves_serialize_without_children() {
    let forest = assemble(&[menu("a", None, 1), menu("b", Some("a"), 1)]);
    let json = serde_json::to_value(&forest).unwrap();

    assert_eq!(json[0]["record_id"], "a");
    assert_eq!(json[0]["children"][0]["record_id"], "b");
    assert!(json[0]["children"][0].get("children").is_none());
}

#[test]
fn test_deep_parent_chain_is_assembled() {
    let depth = 3_000;
    let records: Vec<MenuRecord> = (0..depth)
        .map(|i| {
            let parent = (i > 0).then(|| format!("m{}", i - 1));
            menu(&format!("m{i}"), parent.as_deref(), 1)
        })
        .collect();

    let forest = assemble(&records);

    assert_eq!(ids(&forest), vec!["m0"]);
    assert_eq!(forest[0].node_count(), depth);

    let mut node = &forest[0];
    let mut levels = 1;
    while let Some(child) = node.children.first() {
        assert_eq!(child.record.parent_id.as_deref(), Some(node.record.record_id.as_str()));
        node = child;
        levels += 1;
    }
    assert_eq!(levels, depth);
}
