//! Parameter binder compilation.
//!
//! A binder copies the members of a parameter object onto a command: it adds
//! one parameter per referenced member, expands list members, substitutes
//! `{=name}` literals and finally rewrites `?name?` pseudo-positional tokens.
//! Everything that only depends on the command text and the parameter type is
//! decided once, when the binder is compiled.

use std::sync::Arc;

use rowmap_core::{
    BindTarget, CommandKind, ConfigErrorKind, DbType, DynamicEntry, ErasedTypeHandler, Error,
    ParamKind, ParamMap, ParamMember, ParamValue, Parameter, ParameterDirection, Result, ToParams,
    Value,
};

use crate::config::MapperConfig;
use crate::identity::Identity;
use crate::sql;

/// Binds a parameter object of type `P` onto a command.
pub type ParamBinder<P> = Arc<dyn Fn(&mut dyn BindTarget, &P) -> Result<()> + Send + Sync>;

struct MemberPlan<P> {
    member: ParamMember<P>,
    db_type: Option<DbType>,
    handler: Option<Arc<dyn ErasedTypeHandler>>,
}

/// Compile the binder for parameter type `P` and the command in `identity`.
pub fn compile_binder<P: ToParams>(
    identity: &Identity,
    config: &MapperConfig,
) -> Result<ParamBinder<P>> {
    let map = P::param_map();
    let string_length = config.settings().string_length;

    if let Some(entries) = map.dynamic_entries() {
        tracing::debug!(
            params = std::any::type_name::<P>(),
            sql = identity.sql(),
            "compiled dynamic parameter binder"
        );
        return Ok(Arc::new(move |target: &mut dyn BindTarget, params: &P| {
            let entries = entries(params);
            for entry in &entries {
                bind_entry(target, entry, string_length)?;
            }
            finish(target, |name| {
                entries
                    .iter()
                    .find(|e| e.name.eq_ignore_ascii_case(name))
                    .map(|e| format_literal(&e.value))
                    .transpose()
            })
        }));
    }

    let ordered = ordered_members(&map);
    let bound: Vec<ParamMember<P>> =
        if identity.kind() == CommandKind::Text && !sql::looks_positional(identity.sql()) {
            let referenced = sql::referenced_names(identity.sql())?;
            ordered
                .into_iter()
                .filter(|m| referenced.contains(&m.name().to_lowercase()))
                .collect()
        } else {
            ordered
        };

    let plans: Vec<MemberPlan<P>> = bound
        .into_iter()
        .map(|member| MemberPlan {
            db_type: declared_db_type(&member, config),
            handler: config.handlers().get(member.member_type()).cloned(),
            member,
        })
        .collect();

    let literal_members: Vec<ParamMember<P>> = if sql::literal_tokens(identity.sql())?.is_empty() {
        Vec::new()
    } else {
        map.members().to_vec()
    };

    tracing::debug!(
        params = std::any::type_name::<P>(),
        sql = identity.sql(),
        bound = plans.len(),
        literals = literal_members.len(),
        "compiled parameter binder"
    );

    Ok(Arc::new(move |target: &mut dyn BindTarget, params: &P| {
        for plan in &plans {
            bind_member(target, plan, params, string_length)?;
        }
        finish(target, |name| {
            literal_members
                .iter()
                .find(|m| m.name().eq_ignore_ascii_case(name))
                .map(|m| format_literal(&m.read(params)))
                .transpose()
        })
    }))
}

/// Declared constructor order when it names every member, else alphabetical.
fn ordered_members<P>(map: &ParamMap<P>) -> Vec<ParamMember<P>> {
    let mut members = map.members().to_vec();
    let position = |name: &str, order: &[&'static str]| {
        order.iter().position(|o| o.eq_ignore_ascii_case(name))
    };
    match map.constructor_order() {
        Some(order)
            if order.len() == members.len()
                && members.iter().all(|m| position(m.name(), order).is_some()) =>
        {
            members.sort_by_key(|m| position(m.name(), order));
        }
        _ => members.sort_by(|a, b| a.name().cmp(b.name())),
    }
    members
}

fn declared_db_type<P>(member: &ParamMember<P>, config: &MapperConfig) -> Option<DbType> {
    config
        .db_type_for(member.member_type())
        .or(match member.kind() {
            ParamKind::Scalar(DbType::Object) => None,
            ParamKind::Scalar(db_type) => Some(db_type),
            ParamKind::List | ParamKind::Custom => None,
        })
}

fn bind_member<P>(
    target: &mut dyn BindTarget,
    plan: &MemberPlan<P>,
    params: &P,
    string_length: usize,
) -> Result<()> {
    let name = plan.member.name();
    if let Some(handler) = &plan.handler {
        let mut parameter = Parameter::new(name, Value::Null);
        handler.set_value_erased(&mut parameter, plan.member.read_any(params))?;
        target.parameters_mut().add(parameter);
        return Ok(());
    }
    let entry = DynamicEntry {
        name,
        value: plan.member.read(params),
        db_type: plan.db_type,
        direction: ParameterDirection::Input,
        size: None,
    };
    bind_entry(target, &entry, string_length)
}

fn bind_entry(target: &mut dyn BindTarget, entry: &DynamicEntry<'_>, string_length: usize) -> Result<()> {
    match &entry.value {
        ParamValue::Custom(custom) => custom.add_parameter(target, entry.name),
        ParamValue::List(items) => bind_list(target, entry.name, items, string_length),
        ParamValue::Value(value) => {
            let mut parameter = Parameter::new(entry.name, value.clone())
                .with_db_type(entry.db_type.unwrap_or_else(|| DbType::for_value(value)))
                .with_direction(entry.direction);
            if let Some(size) = entry.size.or_else(|| text_size(value, string_length)) {
                parameter = parameter.with_size(size);
            }
            target.parameters_mut().add(parameter);
            Ok(())
        }
    }
}

fn bind_list(
    target: &mut dyn BindTarget,
    name: &str,
    items: &[Value],
    string_length: usize,
) -> Result<()> {
    if target.supports_arrays() {
        target
            .parameters_mut()
            .add(Parameter::new(name, Value::Array(items.to_vec())));
        return Ok(());
    }

    let db_type = match items.first() {
        Some(Value::Null) => {
            return Err(Error::config(
                ConfigErrorKind::UnsupportedType,
                "The first item in a list-expansion cannot be null",
            ));
        }
        Some(first) => DbType::for_value(first),
        None => DbType::Object,
    };
    for (i, item) in items.iter().enumerate() {
        let mut parameter =
            Parameter::new(format!("{}{}", name, i + 1), item.clone()).with_db_type(db_type);
        if let Some(size) = text_size(item, string_length) {
            parameter = parameter.with_size(size);
        }
        target.parameters_mut().add(parameter);
    }

    let by_position = sql::has_pseudo_positional(target.command_text())?;
    let text = sql::expand_list(target.command_text(), name, items.len(), by_position)?;
    target.set_command_text(text);
    if items.is_empty() {
        target.parameters_mut().add(Parameter::new(name, Value::Null));
    }
    Ok(())
}

fn text_size(value: &Value, string_length: usize) -> Option<i32> {
    match value {
        Value::Text(text) if text.chars().count() <= string_length => {
            Some(i32::try_from(string_length).unwrap_or(i32::MAX))
        }
        Value::Text(_) => Some(-1),
        _ => None,
    }
}

fn finish<F>(target: &mut dyn BindTarget, lookup: F) -> Result<()>
where
    F: FnMut(&str) -> Result<Option<String>>,
{
    let text = sql::substitute_literals(target.command_text(), lookup)?;
    if text != target.command_text() {
        target.set_command_text(text);
    }
    sql::rewrite_pseudo_positional(target)
}

/// The invariant SQL text of a literal member value.
pub fn format_literal(value: &ParamValue<'_>) -> Result<String> {
    match value {
        ParamValue::Value(value) => format_value(value),
        ParamValue::List(items) => format_list(items),
        ParamValue::Custom(_) => Err(Error::config(
            ConfigErrorKind::UnsupportedType,
            "Custom parameters are not supported for SQL literals",
        )),
    }
}

fn format_value(value: &Value) -> Result<String> {
    Ok(match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => String::from(if *b { "1" } else { "0" }),
        Value::TinyInt(v) => v.to_string(),
        Value::SmallInt(v) => v.to_string(),
        Value::Int(v) => v.to_string(),
        Value::BigInt(v) => v.to_string(),
        Value::Float(v) => v.to_string(),
        Value::Double(v) => v.to_string(),
        Value::Decimal(v) => v.clone(),
        Value::Array(items) => format_list(items)?,
        other => {
            return Err(Error::config(
                ConfigErrorKind::UnsupportedType,
                format!("The type '{}' is not supported for SQL literals", other.type_name()),
            ));
        }
    })
}

fn format_list(items: &[Value]) -> Result<String> {
    if items.is_empty() {
        return Ok("(select null where 1=0)".to_string());
    }
    let parts = items.iter().map(format_value).collect::<Result<Vec<_>>>()?;
    Ok(format!("({})", parts.join(",")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::IdentityPolicy;
    use rowmap_core::memory::MemoryCommand;
    use rowmap_core::{DbString, DynamicParams, TypeHandler, TypeKey};

    struct Filter {
        ids: Vec<i32>,
        name: Option<String>,
        age: i64,
        ratio: f64,
    }

    impl ToParams for Filter {
        fn param_map() -> ParamMap<Self> {
            ParamMap::<Self>::new()
                .member("name", |f| &f.name)
                .member("ids", |f| &f.ids)
                .member("age", |f| &f.age)
                .member("ratio", |f| &f.ratio)
        }
    }

    fn filter() -> Filter {
        Filter {
            ids: vec![1, 2, 3, 4, 5],
            name: Some("bob".to_string()),
            age: 42,
            ratio: 3.5,
        }
    }

    fn bind<P: ToParams>(sql: &str, params: &P, config: &MapperConfig) -> Result<MemoryCommand> {
        let identity = Identity::new(sql, CommandKind::Text, "db", IdentityPolicy::default());
        let binder = compile_binder::<P>(&identity, config)?;
        let mut cmd = MemoryCommand::detached(sql);
        binder(&mut cmd, params)?;
        Ok(cmd)
    }

    fn names(cmd: &MemoryCommand) -> Vec<String> {
        cmd.parameters().iter().map(|p| p.name.clone()).collect()
    }

    #[test]
    fn test_unreferenced_members_are_skipped() {
        let cmd = bind("select * from t where name = @name and age = :age", &filter(), &MapperConfig::default()).unwrap();
        assert_eq!(names(&cmd), vec!["age", "name"]);

        let name = cmd.parameters().get("name").unwrap();
        assert_eq!(name.db_type, Some(DbType::String));
        assert_eq!(name.size, Some(4000));
        assert_eq!(name.direction, ParameterDirection::Input);
        assert_eq!(cmd.parameters().get("age").unwrap().db_type, Some(DbType::Int64));
    }

    #[test]
    fn test_positional_text_binds_everything() {
        let cmd = bind("select * from t where a = ?", &filter(), &MapperConfig::default()).unwrap();
        assert_eq!(
            names(&cmd),
            vec!["age", "ids1", "ids2", "ids3", "ids4", "ids5", "name", "ratio"]
        );
    }

    #[test]
    fn test_list_expansion() {
        let cmd = bind("select * from t where id in @ids", &filter(), &MapperConfig::default()).unwrap();
        assert_eq!(
            cmd.command_text(),
            "select * from t where id in (@ids1,@ids2,@ids3,@ids4,@ids5)"
        );
        assert_eq!(names(&cmd), vec!["ids1", "ids2", "ids3", "ids4", "ids5"]);
        assert_eq!(cmd.parameters().get("ids3").unwrap().value, Value::Int(3));
        assert_eq!(cmd.parameters().get("ids3").unwrap().db_type, Some(DbType::Int32));
    }

    #[test]
    fn test_empty_list() {
        let params = Filter { ids: Vec::new(), ..filter() };
        let cmd = bind("select * from t where id in @ids", &params, &MapperConfig::default()).unwrap();
        assert_eq!(cmd.command_text(), "select * from t where id in (SELECT @ids WHERE 1 = 0)");
        assert_eq!(names(&cmd), vec!["ids"]);
        assert_eq!(cmd.parameters().get("ids").unwrap().value, Value::Null);
    }

    #[test]
    fn test_literals() {
        let cmd = bind(
            "select * from t where ratio > {=ratio} and age = {=age} and id in {=ids}",
            &filter(),
            &MapperConfig::default(),
        )
        .unwrap();
        assert_eq!(
            cmd.command_text(),
            "select * from t where ratio > 3.5 and age = 42 and id in (1,2,3,4,5)"
        );
        assert!(cmd.parameters().is_empty());
    }

    #[test]
    fn test_text_literal_is_unsupported() {
        let err = bind("select {=name}", &filter(), &MapperConfig::default()).unwrap_err();
        assert_eq!(err.config_kind(), Some(ConfigErrorKind::UnsupportedType));
    }

    #[test]
    fn test_format_literal_values() {
        let value = |v: Value| format_literal(&ParamValue::Value(v)).unwrap();
        assert_eq!(value(Value::Decimal("3.5".to_string())), "3.5");
        assert_eq!(value(Value::Bool(true)), "1");
        assert_eq!(value(Value::Bool(false)), "0");
        assert_eq!(value(Value::Null), "null");
        assert_eq!(
            format_literal(&ParamValue::List(Vec::new())).unwrap(),
            "(select null where 1=0)"
        );
    }

    #[test]
    fn test_long_text_is_unbounded() {
        let params = Filter { name: Some("x".repeat(4001)), ..filter() };
        let cmd = bind("select @name", &params, &MapperConfig::default()).unwrap();
        assert_eq!(cmd.parameters().get("name").unwrap().size, Some(-1));
    }

    #[test]
    fn test_constructor_order_with_pseudo_positional() {
        struct Pair {
            b: i32,
            a: i32,
        }
        impl ToParams for Pair {
            fn param_map() -> ParamMap<Self> {
                ParamMap::<Self>::new()
                    .member("a", |p| &p.a)
                    .member("b", |p| &p.b)
                    .constructor(&["b", "a"])
            }
        }

        let cmd = bind("select ?a?, ?b?", &Pair { b: 2, a: 1 }, &MapperConfig::default()).unwrap();
        assert_eq!(cmd.command_text(), "select ?, ?");
        assert_eq!(names(&cmd), vec!["a", "b"]);
        assert_eq!(cmd.parameters().get("a").unwrap().value, Value::Int(1));
    }

    #[test]
    fn test_type_map_override_and_handler() {
        struct Upper;
        impl TypeHandler<i64> for Upper {
            fn set_value(&self, parameter: &mut Parameter, value: &i64) {
                parameter.value = Value::Text(format!("#{}", value));
                parameter.db_type = Some(DbType::AnsiString);
            }
            fn parse(&self, value: &Value) -> Result<i64> {
                rowmap_core::FromValue::from_value(value)
            }
        }

        let mut config = MapperConfig::default();
        config.map_type(TypeKey::of::<f64>(), DbType::Decimal);
        config.register_handler::<i64, _>(Upper);

        let cmd = bind("select @age, @ratio", &filter(), &config).unwrap();
        let age = cmd.parameters().get("age").unwrap();
        assert_eq!(age.value, Value::Text("#42".to_string()));
        assert_eq!(age.db_type, Some(DbType::AnsiString));
        assert_eq!(cmd.parameters().get("ratio").unwrap().db_type, Some(DbType::Decimal));
    }

    #[test]
    fn test_custom_parameter() {
        struct Search {
            term: DbString,
        }
        impl ToParams for Search {
            fn param_map() -> ParamMap<Self> {
                ParamMap::<Self>::new().member("term", |s| &s.term)
            }
        }

        let params = Search { term: DbString::new("abc").ansi().fixed_length(10) };
        let cmd = bind("select @term", &params, &MapperConfig::default()).unwrap();
        let term = cmd.parameters().get("term").unwrap();
        assert_eq!(term.db_type, Some(DbType::AnsiStringFixedLength));
        assert_eq!(term.size, Some(10));
    }

    #[test]
    fn test_dynamic_params() {
        let mut params = DynamicParams::new();
        params
            .add("@a", 1)
            .add_list("ids", &[10, 20])
            .add("lim", Value::Decimal("2.5".to_string()))
            .add("unused", "x");

        let cmd = bind("select @a where id in @ids limit {=lim}", &params, &MapperConfig::default()).unwrap();
        assert_eq!(cmd.command_text(), "select @a where id in (@ids1,@ids2) limit 2.5");
        assert!(cmd.parameters().contains("unused"));
        assert_eq!(cmd.parameters().get("a").unwrap().db_type, Some(DbType::Int32));
    }

    #[test]
    fn test_first_list_item_null() {
        let mut params = DynamicParams::new();
        params.add("ids", Value::Array(vec![Value::Null, Value::Int(1)]));
        let err = bind("select @ids", &params, &MapperConfig::default()).unwrap_err();
        assert_eq!(err.config_kind(), Some(ConfigErrorKind::UnsupportedType));
    }
}
