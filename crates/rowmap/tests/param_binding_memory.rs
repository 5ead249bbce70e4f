//! Parameter binding end to end: what the driver receives for each kind of
//! parameter object.

use rowmap::{
    ConfigErrorKind, DbString, DbType, DynamicParams, Mapped, Mapper, Parameter, Params,
    ParameterDirection, Result, SqlEnum, TypeHandler, UsageErrorKind, Value,
};
use rowmap_core::memory::{ExecutedCommand, MemoryConnection, ResultSet};
use rowmap_core::{FromValue, ParamKind, ParamValue, ToParam};

#[derive(SqlEnum, Debug, Clone, Copy, PartialEq)]
enum Status {
    Draft = 0,
    Published = 1,
}

#[derive(Params)]
struct Filter {
    ids: Vec<i32>,
    status: Status,
    owner: String,
}

fn only(conn: &MemoryConnection) -> ExecutedCommand {
    let mut executed = conn.executed();
    assert_eq!(executed.len(), 1);
    executed.remove(0)
}

fn names(command: &ExecutedCommand) -> Vec<&str> {
    command.parameters.iter().map(|p| p.name.as_str()).collect()
}

#[test]
fn list_expands_into_numbered_parameters() {
    let mapper = Mapper::new();
    let conn = MemoryConnection::new("db");
    conn.push_affected(0);

    let filter = Filter {
        ids: vec![1, 2, 3, 4, 5],
        status: Status::Published,
        owner: "ann".into(),
    };
    mapper
        .execute(&conn, "delete from posts where id in @ids and status = @status", &filter)
        .unwrap();

    let command = only(&conn);
    assert_eq!(
        command.text,
        "delete from posts where id in (@ids1,@ids2,@ids3,@ids4,@ids5) and status = @status"
    );
    assert_eq!(names(&command), vec!["ids1", "ids2", "ids3", "ids4", "ids5", "status"]);
    assert_eq!(command.parameters[4].value, Value::Int(5));
    assert_eq!(command.parameters[5].value, Value::Int(1));
    assert_eq!(command.parameters[5].db_type, Some(DbType::Int32));
}

#[test]
fn empty_list_matches_nothing() {
    let mapper = Mapper::new();
    let conn = MemoryConnection::new("db");
    conn.push_affected(0);

    let filter = Filter {
        ids: Vec::new(),
        status: Status::Draft,
        owner: "ann".into(),
    };
    mapper
        .execute(&conn, "delete from posts where id in @ids", &filter)
        .unwrap();

    let command = only(&conn);
    assert_eq!(command.text, "delete from posts where id in (SELECT @ids WHERE 1 = 0)");
    assert_eq!(names(&command), vec!["ids"]);
    assert_eq!(command.parameters[0].value, Value::Null);
}

#[test]
fn array_capable_driver_gets_one_array_parameter() {
    let mapper = Mapper::new();
    let conn = MemoryConnection::new("db").with_array_support();
    conn.push_affected(0);

    let filter = Filter {
        ids: vec![7, 8],
        status: Status::Draft,
        owner: "ann".into(),
    };
    mapper
        .execute(&conn, "delete from posts where id = any(@ids)", &filter)
        .unwrap();

    let command = only(&conn);
    assert_eq!(command.text, "delete from posts where id = any(@ids)");
    assert_eq!(
        command.parameters[0].value,
        Value::Array(vec![Value::Int(7), Value::Int(8)])
    );
}

#[test]
fn literals_are_inlined() {
    let mapper = Mapper::new();
    let conn = MemoryConnection::new("db");
    conn.push_result(ResultSet::new(["n"]).row([Value::BigInt(1)]));

    let mut params = DynamicParams::new();
    params.add("rate", Value::Decimal("3.5".into()));
    params.add("enabled", true);
    let _: Vec<i64> = mapper
        .query(
            &conn,
            "select count(*) from loans where rate > {=rate} and enabled = {=enabled}",
            &params,
        )
        .unwrap();

    let command = only(&conn);
    assert_eq!(
        command.text,
        "select count(*) from loans where rate > 3.5 and enabled = 1"
    );
}

#[test]
fn text_literal_is_rejected() {
    let mapper = Mapper::new();
    let conn = MemoryConnection::new("db");

    let filter = Filter {
        ids: vec![1],
        status: Status::Draft,
        owner: "ann".into(),
    };
    let err = mapper
        .execute(&conn, "select * from posts where owner = {=owner}", &filter)
        .unwrap_err();

    assert_eq!(err.config_kind(), Some(ConfigErrorKind::UnsupportedType));
    assert!(conn.executed().is_empty());
}

#[test]
fn pseudo_positional_tokens_reorder_parameters() {
    let mapper = Mapper::new();
    let conn = MemoryConnection::new("db");
    conn.push_affected(1);

    let mut params = DynamicParams::new();
    params.add("a", 1).add("b", 2).add("unused", 3);
    mapper
        .execute(&conn, "update t set x = ?b? where y = ?a?", &params)
        .unwrap();

    let command = only(&conn);
    assert_eq!(command.text, "update t set x = ? where y = ?");
    assert_eq!(names(&command), vec!["b", "a"]);
}

#[test]
fn pseudo_positional_token_used_twice_is_an_error() {
    let mapper = Mapper::new();
    let conn = MemoryConnection::new("db");

    let mut params = DynamicParams::new();
    params.add("a", 1);
    let err = mapper
        .execute(&conn, "select ?a?, ?a?", &params)
        .unwrap_err();

    assert_eq!(err.usage_kind(), Some(UsageErrorKind::DuplicatePositional));
}

#[test]
fn dynamic_parameters_keep_their_hints() {
    let mapper = Mapper::new();
    let conn = MemoryConnection::new("db");
    conn.push_affected(1);

    let mut params = DynamicParams::new();
    params
        .add_typed(
            "@total",
            Value::Null,
            DbType::Int64,
            ParameterDirection::Output,
            None,
        )
        .add("name", "x".repeat(5000))
        .add_custom("code", DbString::new("ab").ansi().fixed_length(2));
    mapper
        .execute(&conn, "exec tally @total, @name, @code", &params)
        .unwrap();

    let command = only(&conn);
    let total = &command.parameters[0];
    assert_eq!(total.name, "total");
    assert_eq!(total.direction, ParameterDirection::Output);
    assert_eq!(total.db_type, Some(DbType::Int64));
    assert_eq!(command.parameters[1].size, Some(-1));
    assert_eq!(command.parameters[2].db_type, Some(DbType::AnsiStringFixedLength));
}

#[test]
fn execute_many_reuses_one_plan() {
    let mapper = Mapper::new();
    let conn = MemoryConnection::new("db");
    conn.push_affected(1).push_affected(2);

    let rows = vec![
        Filter {
            ids: vec![1],
            status: Status::Draft,
            owner: "a".into(),
        },
        Filter {
            ids: vec![2, 3],
            status: Status::Published,
            owner: "b".into(),
        },
    ];
    let total = mapper
        .execute_many(&conn, "delete from posts where id in @ids and owner = @owner", &rows)
        .unwrap();

    assert_eq!(total, 3);
    let executed = conn.executed();
    assert_eq!(executed.len(), 2);
    assert_eq!(
        executed[1].text,
        "delete from posts where id in (@ids1,@ids2) and owner = @owner"
    );
    assert_eq!(names(&executed[0]), vec!["ids1", "owner"]);
    assert_eq!(names(&executed[1]), vec!["ids1", "ids2", "owner"]);
    assert_eq!(mapper.cached_sql_count(), 1);
    assert_eq!(mapper.execute_many(&conn, "select 1", &Vec::<Filter>::new()).unwrap(), 0);
}

#[derive(Debug, Default, Clone, Copy, PartialEq)]
struct Celsius(f64);

impl FromValue for Celsius {
    fn from_value(value: &Value) -> Result<Self> {
        f64::from_value(value).map(Celsius)
    }
}

impl ToParam for Celsius {
    fn param_kind() -> ParamKind {
        ParamKind::Scalar(DbType::Double)
    }

    fn to_param(&self) -> ParamValue<'_> {
        ParamValue::Value(Value::Double(self.0))
    }
}

struct SuffixedCelsius;

impl TypeHandler<Celsius> for SuffixedCelsius {
    fn set_value(&self, parameter: &mut Parameter, value: &Celsius) {
        parameter.value = Value::Text(format!("{}C", value.0));
        parameter.db_type = Some(DbType::AnsiString);
    }

    fn parse(&self, value: &Value) -> Result<Celsius> {
        let text = String::from_value(value)?;
        let number = text.trim_end_matches('C').parse::<f64>().map_err(|e| {
            rowmap::Error::Custom(format!("bad temperature {}: {}", text, e))
        })?;
        Ok(Celsius(number))
    }
}

#[derive(Mapped, Params, Debug, Default, PartialEq)]
struct Reading {
    id: i64,
    temp: Celsius,
}

#[test]
fn type_handler_covers_binding_and_reading() {
    let mapper = Mapper::new();
    mapper.add_type_handler::<Celsius, _>(SuffixedCelsius);
    let conn = MemoryConnection::new("db");
    conn.push_result(
        ResultSet::new(["id", "temp"]).row([Value::BigInt(1), Value::Text("21.5C".into())]),
    );

    let readings: Vec<Reading> = mapper
        .query(
            &conn,
            "select id, temp from readings where id = @id and temp = @temp",
            &Reading {
                id: 1,
                temp: Celsius(21.5),
            },
        )
        .unwrap();

    assert_eq!(
        readings,
        vec![Reading {
            id: 1,
            temp: Celsius(21.5)
        }]
    );
    let command = only(&conn);
    assert_eq!(command.parameters[1].value, Value::Text("21.5C".into()));
    assert_eq!(command.parameters[1].db_type, Some(DbType::AnsiString));
}
