// Statement text understood by the memory store: `<VERB> [INTO|FROM] <table>`.
// Values travel as named parameters; `id` is the row key.

use crate::statement::{DataValue, Params, Statement, StatementKind};
use crate::transport::TransportError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Verb {
    Insert,
    Upsert,
    Update,
    Delete,
    Select,
}

#[derive(Debug)]
pub(crate) struct Command<'a> {
    pub verb: Verb,
    pub table: &'a str,
    pub key: Option<i64>,
    pub params: &'a Params,
}

pub(crate) fn parse(statement: &Statement) -> Result<Command<'_>, TransportError> {
    let invalid = |msg: &str| TransportError::InvalidStatement(format!("{} in '{}'", msg, statement.text()));

    let mut words = statement.text().split_whitespace();
    let verb = match words.next().map(str::to_ascii_uppercase).as_deref() {
        Some("INSERT") => Verb::Insert,
        Some("UPSERT") => Verb::Upsert,
        Some("UPDATE") => Verb::Update,
        Some("DELETE") => Verb::Delete,
        Some("SELECT") => Verb::Select,
        _ => return Err(invalid("unknown verb")),
    };

    let mut table = words.next().ok_or_else(|| invalid("missing table"))?;
    if table.eq_ignore_ascii_case("INTO") || table.eq_ignore_ascii_case("FROM") {
        table = words.next().ok_or_else(|| invalid("missing table"))?;
    }
    if words.next().is_some() {
        return Err(invalid("unexpected trailing text"));
    }

    let expected = if verb == Verb::Select { StatementKind::Read } else { StatementKind::Write };
    if statement.kind() != expected {
        return Err(invalid("statement kind does not match verb"));
    }

    let key = match statement.param("id") {
        Some(DataValue::Integer(id)) => Some(*id),
        Some(_) => return Err(invalid("id must be an integer")),
        None => None,
    };
    if verb != Verb::Select && key.is_none() {
        return Err(invalid("writes need an id parameter"));
    }

    Ok(Command {
        verb,
        table,
        key,
        params: statement.params(),
    })
}
