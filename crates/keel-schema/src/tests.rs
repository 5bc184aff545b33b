use super::*;

const USERS_BARE: &str = r#"
name: users
schema:
  postgres:
    primaryKey: [id]
    columns:
      - name: id
        type: integer
      - name: email
        type: text
        constraints:
          notNull: true
        default: "''"
"#;

const USERS_ENVELOPE: &str = r#"
apiVersion: schemas.keel.dev/v1
kind: Table
metadata:
  name: users
spec:
  schema:
    mysql:
      primaryKey: [id]
      defaultCharset: utf8mb4
      columns:
        - name: id
          type: int
          attributes:
            autoIncrement: true
"#;

#[test]
fn test_driver_kind_round_trips_identifiers() {
    for kind in DriverKind::ALL {
        assert_eq!(kind.as_str().parse::<DriverKind>().unwrap(), kind);
    }
}

#[test]
fn test_driver_kind_unknown() {
    let err = "oracle".parse::<DriverKind>().unwrap_err();
    insta::assert_snapshot!(err, @r#"unknown database driver: "oracle""#);
}

#[test]
fn test_parse_bare_spec() {
    let spec = parse_table_spec(USERS_BARE).unwrap();
    assert_eq!(spec.name, "users");

    let Some(DialectSchema::Postgres(pg)) = spec.schema_for(DriverKind::Postgres) else {
        panic!("expected a postgres block");
    };
    assert_eq!(pg.primary_key, vec!["id"]);
    assert_eq!(pg.columns.len(), 2);
    assert!(pg.columns[1].is_not_null());
    assert_eq!(pg.columns[1].default.as_deref(), Some("''"));
    assert!(!pg.columns[0].is_auto_increment());
}

#[test]
fn test_parse_envelope_takes_metadata_name() {
    let spec = parse_table_spec(USERS_ENVELOPE).unwrap();
    assert_eq!(spec.name, "users");

    let Some(DialectSchema::Mysql(my)) = spec.schema_for(DriverKind::Mysql) else {
        panic!("expected a mysql block");
    };
    assert_eq!(my.default_charset.as_deref(), Some("utf8mb4"));
    assert!(my.table.columns[0].is_auto_increment());
}

#[test]
fn test_envelope_without_schema_falls_back_to_bare() {
    // `spec` here is a column named "spec", not an envelope.
    let input = r#"
name: things
spec: {}
schema:
  sqlite:
    columns:
      - name: id
        type: integer
"#;
    let spec = parse_table_spec(input).unwrap();
    assert_eq!(spec.name, "things");
    assert!(spec.schema_for(DriverKind::Sqlite).is_some());
}

#[test]
fn test_schema_for_reads_only_matching_block() {
    let spec = parse_table_spec(USERS_BARE).unwrap();
    assert!(spec.schema_for(DriverKind::Mysql).is_none());
    assert!(spec.schema_for(DriverKind::CockroachDb).is_none());
    assert_eq!(
        spec.schema.as_ref().unwrap().kinds(),
        vec![DriverKind::Postgres]
    );
}

#[test]
fn test_missing_schema_is_rejected() {
    let err = parse_table_spec("name: users\n").unwrap_err();
    assert!(matches!(err, SpecError::NoSchema { .. }), "{err:?}");
}

#[test]
fn test_decode_keeps_spec_without_schema() {
    let spec = decode_table_spec("name: users\n").unwrap();
    assert_eq!(spec.name, "users");
    assert!(spec.schema_for(DriverKind::Sqlite).is_none());
    assert!(spec.validate().is_err());
}

#[test]
fn test_empty_name_is_rejected() {
    let input = r#"
schema:
  postgres:
    columns: []
"#;
    let err = parse_table_spec(input).unwrap_err();
    assert!(matches!(err, SpecError::EmptyName), "{err:?}");
}

#[test]
fn test_numeric_default_is_kept_as_text() {
    let input = r#"
name: counters
schema:
  sqlite:
    strict: true
    columns:
      - name: n
        type: integer
        default: 0
"#;
    let spec = parse_table_spec(input).unwrap();
    let Some(DialectSchema::Sqlite(lite)) = spec.schema_for(DriverKind::Sqlite) else {
        panic!("expected a sqlite block");
    };
    assert!(lite.strict);
    assert_eq!(lite.table.columns[0].default.as_deref(), Some("0"));
}

#[test]
fn test_timescale_block_flattens_table() {
    let input = r#"
name: metrics
schema:
  timescaledb:
    columns:
      - name: time
        type: timestamptz
      - name: value
        type: double precision
    hypertable:
      timeColumnName: time
      chunkTimeInterval: 1 day
"#;
    let spec = parse_table_spec(input).unwrap();
    let Some(DialectSchema::TimescaleDb(ts)) = spec.schema_for(DriverKind::TimescaleDb) else {
        panic!("expected a timescaledb block");
    };
    assert_eq!(ts.table.columns.len(), 2);
    let hyper = ts.hypertable.as_ref().unwrap();
    assert_eq!(hyper.time_column_name, "time");
    assert_eq!(hyper.chunk_time_interval.as_deref(), Some("1 day"));
}

#[test]
fn test_seed_values() {
    let input = r#"
name: users
schema:
  postgres:
    columns:
      - name: id
        type: integer
seedData:
  rows:
    - columns:
        - column: id
          value:
            int: 1
        - column: name
          value:
            str: a
        - column: active
          value:
            bool: true
        - column: note
"#;
    let spec = parse_table_spec(input).unwrap();
    let seed = spec.seed_data.unwrap();
    assert_eq!(seed.rows.len(), 1);
    let row = &seed.rows[0];
    assert_eq!(row.get("id"), Some(&SeedValue::Int(1)));
    assert_eq!(row.get("name"), Some(&SeedValue::Str("a".into())));
    assert_eq!(row.get("active"), Some(&SeedValue::Bool(true)));
    assert_eq!(row.get("note"), Some(&SeedValue::Null));
    let order: Vec<_> = row.columns.keys().map(String::as_str).collect();
    assert_eq!(order, ["id", "name", "active", "note"]);
}

#[test]
fn test_seed_value_with_two_kinds_is_rejected() {
    let input = r#"
name: users
schema:
  postgres:
    columns:
      - name: id
        type: integer
seedData:
  rows:
    - columns:
        - column: id
          value:
            int: 1
            str: "1"
"#;
    assert!(parse_table_spec(input).is_err());
}

#[test]
fn test_seed_duplicate_column_is_rejected() {
    let input = r#"
name: users
schema:
  postgres:
    columns:
      - name: id
        type: integer
seedData:
  rows:
    - columns:
        - column: id
          value:
            int: 1
        - column: id
          value:
            int: 2
"#;
    assert!(parse_table_spec(input).is_err());
}

#[test]
fn test_seed_value_display() {
    assert_eq!(SeedValue::Int(-3).to_string(), "-3");
    assert_eq!(SeedValue::Bool(false).to_string(), "false");
    assert_eq!(SeedValue::Float(1.5).to_string(), "1.5");
    assert_eq!(SeedValue::Str("x".into()).to_string(), "x");
}

#[test]
fn test_parse_type_spec() {
    let input = r#"
apiVersion: schemas.keel.dev/v1
kind: DataType
metadata:
  name: address
spec:
  name: address
  schema:
    cassandra:
      fields:
        - name: street
          type: text
        - name: zip
          type: int
"#;
    let spec = parse_type_spec(input).unwrap();
    assert_eq!(spec.name, "address");
    let Some(DialectTypeSchema::Cassandra(udt)) = spec.schema_for(DriverKind::Cassandra) else {
        panic!("expected a cassandra block");
    };
    assert_eq!(udt.fields.len(), 2);
    assert!(spec.schema_for(DriverKind::Postgres).is_none());
}

#[test]
fn test_cassandra_table_block() {
    let input = r#"
name: events
schema:
  cassandra:
    partitionKey: [tenant]
    clusteringKey:
      - name: at
        descending: true
    columns:
      - name: tenant
        type: text
      - name: at
        type: timestamp
      - name: owner
        type: text
        isStatic: true
"#;
    let spec = parse_table_spec(input).unwrap();
    let Some(DialectSchema::Cassandra(c)) = spec.schema_for(DriverKind::Cassandra) else {
        panic!("expected a cassandra block");
    };
    assert_eq!(c.partition_key, vec!["tenant"]);
    assert!(c.clustering_key[0].descending);
    assert!(c.columns[2].is_static);
}
