use super::*;
use serde_json::json;

fn users_where_name() -> SqlSource {
    SqlSource::dynamic(SqlNode::mixed([
        SqlNode::text("SELECT * FROM t"),
        SqlNode::where_(SqlNode::if_(
            "name != null",
            SqlNode::text("name = #{name}"),
        )),
    ]))
}

fn users_where_name_and_age() -> SqlSource {
    SqlSource::dynamic(SqlNode::mixed([
        SqlNode::text("SELECT * FROM t"),
        SqlNode::where_(SqlNode::mixed([
            SqlNode::if_("name != null", SqlNode::text("name = #{name}")),
            SqlNode::if_("age != null", SqlNode::text("AND age > #{age}")),
        ])),
    ]))
}

#[test]
fn where_collapses_when_body_is_empty() {
    let bound = users_where_name().bound_sql(json!({})).unwrap();
    assert_eq!(bound.sql(), "SELECT * FROM t");
    assert!(bound.params().is_empty());
}

#[test]
fn where_wraps_a_contributing_branch() {
    let bound = users_where_name()
        .bound_sql(json!({"name": "x"}))
        .unwrap();
    assert_eq!(bound.sql(), "SELECT * FROM t WHERE name = ?");
    assert_eq!(bound.params().len(), 1);
    assert_eq!(bound.resolve_value("name").unwrap(), json!("x"));
}

#[test]
fn where_strips_a_leading_and() {
    let bound = users_where_name_and_age()
        .bound_sql(json!({"age": 18}))
        .unwrap();
    assert_eq!(bound.sql(), "SELECT * FROM t WHERE age > ?");
    assert_eq!(bound.params().len(), 1);
    assert_eq!(bound.params()[0].property, "age");
    assert_eq!(bound.resolve_value("age").unwrap(), json!(18));
}

#[test]
fn where_keeps_both_branches_in_order() {
    let bound = users_where_name_and_age()
        .bound_sql(json!({"name": "x", "age": 18}))
        .unwrap();
    assert_eq!(bound.sql(), "SELECT * FROM t WHERE name = ? AND age > ?");
    let names: Vec<&str> = bound.params().iter().map(|p| p.property.as_str()).collect();
    assert_eq!(names, vec!["name", "age"]);
}

#[test]
fn foreach_uniquifies_placeholders_in_order() {
    let source = SqlSource::dynamic(SqlNode::mixed([
        SqlNode::text("SELECT * FROM t WHERE id IN"),
        SqlNode::foreach(
            "ids",
            Some("x"),
            None,
            Some("("),
            Some(")"),
            Some(","),
            SqlNode::text("#{x}"),
        ),
    ]));
    let bound = source.bound_sql(json!({"ids": [10, 20, 30]})).unwrap();
    assert_eq!(bound.sql(), "SELECT * FROM t WHERE id IN ( ? , ? , ? )");

    let names: Vec<&str> = bound.params().iter().map(|p| p.property.as_str()).collect();
    assert_eq!(names, vec!["__frch_x_0", "__frch_x_1", "__frch_x_2"]);
    let mut unique: Vec<&str> = names.clone();
    unique.dedup();
    assert_eq!(unique.len(), 3);

    let values: Vec<serde_json::Value> = names
        .iter()
        .map(|n| bound.resolve_value(n).unwrap())
        .collect();
    assert_eq!(values, vec![json!(10), json!(20), json!(30)]);
}

#[test]
fn foreach_iterates_mappings_by_key() {
    let source = SqlSource::dynamic(SqlNode::foreach(
        "filters",
        Some("v"),
        Some("k"),
        None,
        None,
        Some("AND"),
        SqlNode::text("${k} = #{v}"),
    ));
    let bound = source
        .bound_sql(json!({"filters": {"age": 30, "name": "ada"}}))
        .unwrap();
    // serde_json maps iterate in key order
    assert_eq!(bound.sql(), "age = ? AND name = ?");
    assert_eq!(bound.resolve_value(&bound.params()[0].property).unwrap(), json!(30));
    assert_eq!(bound.resolve_value(&bound.params()[1].property).unwrap(), json!("ada"));
}

#[test]
fn foreach_over_null_is_a_build_error() {
    let source = SqlSource::dynamic(SqlNode::foreach(
        "ids",
        Some("x"),
        None,
        Some("("),
        Some(")"),
        Some(","),
        SqlNode::text("#{x}"),
    ));
    let err = source.bound_sql(json!({})).unwrap_err();
    assert!(err.is_build());
}

#[test]
fn foreach_over_empty_collection_emits_nothing() {
    let source = SqlSource::dynamic(SqlNode::mixed([
        SqlNode::text("SELECT * FROM t"),
        SqlNode::where_(SqlNode::foreach(
            "ids",
            Some("x"),
            None,
            Some("id IN ("),
            Some(")"),
            Some(","),
            SqlNode::text("#{x}"),
        )),
    ]));
    let bound = source.bound_sql(json!({"ids": []})).unwrap();
    assert_eq!(bound.sql(), "SELECT * FROM t");
}

#[test]
fn nested_foreach_keeps_descriptors_distinct() {
    let source = SqlSource::dynamic(SqlNode::foreach(
        "groups",
        Some("g"),
        None,
        None,
        None,
        Some("OR"),
        SqlNode::foreach(
            "g",
            Some("x"),
            None,
            Some("id IN ("),
            Some(")"),
            Some(","),
            SqlNode::text("#{x}"),
        ),
    ));
    let bound = source
        .bound_sql(json!({"groups": [[1, 2], [3]]}))
        .unwrap();
    assert_eq!(bound.sql(), "id IN ( ? , ? ) OR id IN ( ? )");
    let values: Vec<serde_json::Value> = bound
        .params()
        .iter()
        .map(|p| bound.resolve_value(&p.property).unwrap())
        .collect();
    assert_eq!(values, vec![json!(1), json!(2), json!(3)]);
}

#[test]
fn choose_applies_first_truthy_branch() {
    let source = SqlSource::dynamic(SqlNode::mixed([
        SqlNode::text("SELECT * FROM t"),
        SqlNode::where_(SqlNode::choose(
            vec![
                ("id != null".to_string(), SqlNode::text("id = #{id}")),
                ("name != null".to_string(), SqlNode::text("name = #{name}")),
            ],
            Some(SqlNode::text("1 = 1")),
        )),
    ]));

    let by_id = source.bound_sql(json!({"id": 1, "name": "x"})).unwrap();
    assert_eq!(by_id.sql(), "SELECT * FROM t WHERE id = ?");

    let by_name = source.bound_sql(json!({"name": "x"})).unwrap();
    assert_eq!(by_name.sql(), "SELECT * FROM t WHERE name = ?");

    let fallback = source.bound_sql(json!({})).unwrap();
    assert_eq!(fallback.sql(), "SELECT * FROM t WHERE 1 = 1");
}

#[test]
fn set_strips_a_trailing_comma() {
    let source = SqlSource::dynamic(SqlNode::mixed([
        SqlNode::text("UPDATE t"),
        SqlNode::set_(SqlNode::mixed([
            SqlNode::if_("name != null", SqlNode::text("name = #{name},")),
            SqlNode::if_("age != null", SqlNode::text("age = #{age},")),
        ])),
        SqlNode::text("WHERE id = #{id}"),
    ]));
    let bound = source
        .bound_sql(json!({"name": "x", "id": 7}))
        .unwrap();
    assert_eq!(bound.sql(), "UPDATE t SET name = ? WHERE id = ?");
    let names: Vec<&str> = bound.params().iter().map(|p| p.property.as_str()).collect();
    assert_eq!(names, vec!["name", "id"]);
}

#[test]
fn trim_empty_body_suppresses_prefix_and_suffix() {
    let source = SqlSource::dynamic(SqlNode::mixed([
        SqlNode::text("SELECT 1"),
        SqlNode::trim(
            SqlNode::if_("never != null", SqlNode::text("  ")),
            Some("PREFIX"),
            None,
            Some("SUFFIX"),
            None,
        ),
    ]));
    let bound = source.bound_sql(json!({})).unwrap();
    assert_eq!(bound.sql(), "SELECT 1");
}

#[test]
fn trim_overrides_match_case_insensitively_first_wins() {
    let source = SqlSource::dynamic(SqlNode::trim(
        SqlNode::text("and x = #{x}"),
        Some("WHERE"),
        Some("AND |OR "),
        None,
        None,
    ));
    let bound = source.bound_sql(json!({"x": 1})).unwrap();
    assert_eq!(bound.sql(), "WHERE x = ?");
}

#[test]
fn bind_publishes_an_additional_parameter() {
    let source = SqlSource::dynamic(SqlNode::mixed([
        SqlNode::bind("pattern", "'%' + name + '%'"),
        SqlNode::text("SELECT * FROM t WHERE name LIKE #{pattern}"),
    ]));
    let bound = source.bound_sql(json!({"name": "ada"})).unwrap();
    assert_eq!(bound.sql(), "SELECT * FROM t WHERE name LIKE ?");
    assert_eq!(bound.resolve_value("pattern").unwrap(), json!("%ada%"));
    assert_eq!(
        bound.additional_parameters().get("pattern"),
        Some(&json!("%ada%"))
    );
}

#[test]
fn splice_substitutes_text_and_placeholders_bind() {
    let source = SqlSource::dynamic(SqlNode::mixed([
        SqlNode::text("SELECT * FROM ${table} WHERE id = #{id}"),
        SqlNode::text("ORDER BY ${order}"),
    ]));
    let bound = source
        .bound_sql(json!({"table": "users", "order": "id DESC", "id": 3}))
        .unwrap();
    assert_eq!(
        bound.sql(),
        "SELECT * FROM users WHERE id = ? ORDER BY id DESC"
    );
    assert_eq!(bound.params().len(), 1);
}

#[test]
fn splice_of_null_is_empty() {
    let source = SqlSource::dynamic(SqlNode::text("SELECT id${missing} FROM t"));
    let bound = source.bound_sql(json!({})).unwrap();
    assert_eq!(bound.sql(), "SELECT id FROM t");
}

#[test]
fn spliced_values_are_not_rescanned_for_placeholders() {
    // the spliced value contains a #{...}-looking token; a single pass
    // must leave it alone rather than binding a parameter
    let source = SqlSource::dynamic(SqlNode::text("SELECT ${frag} FROM t"));
    let bound = source
        .bound_sql(json!({"frag": "'#{not_a_param}'"}))
        .unwrap();
    assert_eq!(bound.sql(), "SELECT '#{not_a_param}' FROM t");
    assert!(bound.params().is_empty());
}

#[test]
fn placeholder_arity_matches_descriptor_count() {
    let cases = [
        (json!({}), users_where_name_and_age()),
        (json!({"name": "a"}), users_where_name_and_age()),
        (json!({"name": "a", "age": 1}), users_where_name_and_age()),
    ];
    for (param, source) in cases {
        let bound = source.bound_sql(param).unwrap();
        assert_eq!(bound.placeholder_count(), bound.params().len());
    }
}

#[test]
fn raw_source_parses_placeholders_once() {
    let source = SqlSource::from_text("INSERT INTO t (a, b) VALUES (#{a}, #{b})").unwrap();
    assert!(matches!(source, SqlSource::Raw { .. }));
    let bound = source.bound_sql(json!({"a": 1, "b": 2})).unwrap();
    assert_eq!(bound.sql(), "INSERT INTO t (a, b) VALUES (?, ?)");
    assert_eq!(bound.params().len(), 2);
}

#[test]
fn raw_text_with_splice_becomes_dynamic() {
    let source = SqlSource::from_text("SELECT * FROM ${table}").unwrap();
    assert!(matches!(source, SqlSource::Dynamic(_)));
}

#[test]
fn empty_composition_is_a_build_error() {
    let source = SqlSource::dynamic(SqlNode::if_("nope != null", SqlNode::text("SELECT 1")));
    let err = source.bound_sql(json!({})).unwrap_err();
    assert!(err.is_build());
}
