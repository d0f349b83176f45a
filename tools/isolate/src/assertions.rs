use crate::errors::IsolateError;
use crate::reporter::TestReporter;
use crate::types::CallSite;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

pub const LIBRARY_CONTEXT: &str = "assert";

pub type AssertFn = Arc<
    dyn Fn(&mut dyn TestReporter, &CallSite, &[Value]) -> Result<bool, IsolateError>
        + Send
        + Sync,
>;

pub fn library() -> BTreeMap<String, AssertFn> {
    let mut exports: BTreeMap<String, AssertFn> = BTreeMap::new();
    exports.insert("ok".to_string(), Arc::new(ok));
    exports.insert("is".to_string(), Arc::new(is));
    exports.insert("isnt".to_string(), Arc::new(isnt));
    exports.insert("pass".to_string(), Arc::new(pass));
    exports.insert("fail".to_string(), Arc::new(fail));
    exports.insert("is_deeply".to_string(), Arc::new(is_deeply));
    exports.insert("cmp_ok".to_string(), Arc::new(cmp_ok));
    exports.insert("contains".to_string(), Arc::new(contains));
    exports
}

pub fn ok(
    reporter: &mut dyn TestReporter,
    site: &CallSite,
    args: &[Value],
) -> Result<bool, IsolateError> {
    let cond = required(args, 0, "ok")?;
    let passed = truthy(cond);
    reporter.report(passed, &name_arg(args, 1), site);
    Ok(passed)
}

pub fn is(
    reporter: &mut dyn TestReporter,
    site: &CallSite,
    args: &[Value],
) -> Result<bool, IsolateError> {
    let got = required(args, 0, "is")?;
    let expected = required(args, 1, "is")?;
    let passed = render(got) == render(expected);
    reporter.report(passed, &name_arg(args, 2), site);
    if !passed {
        reporter.diag(&format!(
            "         got: {}\n    expected: {}",
            quoted(got),
            quoted(expected)
        ));
    }
    Ok(passed)
}

pub fn isnt(
    reporter: &mut dyn TestReporter,
    site: &CallSite,
    args: &[Value],
) -> Result<bool, IsolateError> {
    let got = required(args, 0, "isnt")?;
    let unexpected = required(args, 1, "isnt")?;
    let passed = render(got) != render(unexpected);
    reporter.report(passed, &name_arg(args, 2), site);
    if !passed {
        reporter.diag(&format!("         got: {}\n    expected: anything else", quoted(got)));
    }
    Ok(passed)
}

pub fn pass(
    reporter: &mut dyn TestReporter,
    site: &CallSite,
    args: &[Value],
) -> Result<bool, IsolateError> {
    reporter.report(true, &name_arg(args, 0), site);
    Ok(true)
}

pub fn fail(
    reporter: &mut dyn TestReporter,
    site: &CallSite,
    args: &[Value],
) -> Result<bool, IsolateError> {
    reporter.report(false, &name_arg(args, 0), site);
    Ok(false)
}

pub fn is_deeply(
    reporter: &mut dyn TestReporter,
    site: &CallSite,
    args: &[Value],
) -> Result<bool, IsolateError> {
    let got = required(args, 0, "is_deeply")?;
    let expected = required(args, 1, "is_deeply")?;
    let difference = first_difference(got, expected, "$");
    reporter.report(difference.is_none(), &name_arg(args, 2), site);
    match difference {
        Some((path, left, right)) => {
            reporter.diag(&format!(
                "    Structures begin differing at:\n          {path} = {left}\n     expected = {right}"
            ));
            Ok(false)
        }
        None => Ok(true),
    }
}

pub fn cmp_ok(
    reporter: &mut dyn TestReporter,
    site: &CallSite,
    args: &[Value],
) -> Result<bool, IsolateError> {
    let got = required(args, 0, "cmp_ok")?;
    let op = required(args, 1, "cmp_ok")?
        .as_str()
        .ok_or_else(|| IsolateError::Assertion("cmp_ok operator must be a string".to_string()))?;
    let expected = required(args, 2, "cmp_ok")?;
    let passed = compare(got, op, expected)?;
    reporter.report(passed, &name_arg(args, 3), site);
    if !passed {
        reporter.diag(&format!("    {}\n        {op}\n    {}", quoted(got), quoted(expected)));
    }
    Ok(passed)
}

pub fn contains(
    reporter: &mut dyn TestReporter,
    site: &CallSite,
    args: &[Value],
) -> Result<bool, IsolateError> {
    let haystack = required(args, 0, "contains")?;
    let needle = required(args, 1, "contains")?;
    let passed = match haystack {
        Value::Array(items) => items.contains(needle),
        Value::Object(map) => needle.as_str().is_some_and(|key| map.contains_key(key)),
        other => render(other).contains(&render(needle)),
    };
    reporter.report(passed, &name_arg(args, 2), site);
    if !passed {
        reporter.diag(&format!(
            "    {}\n    does not contain {}",
            quoted(haystack),
            quoted(needle)
        ));
    }
    Ok(passed)
}

fn required<'a>(args: &'a [Value], index: usize, name: &str) -> Result<&'a Value, IsolateError> {
    args.get(index).ok_or_else(|| {
        IsolateError::Assertion(format!(
            "{name} expects at least {} argument(s), got {}",
            index + 1,
            args.len()
        ))
    })
}

fn name_arg(args: &[Value], index: usize) -> String {
    match args.get(index) {
        None | Some(Value::Null) => String::new(),
        Some(value) => render(value),
    }
}

/// Perl-flavoured truthiness: undef, false, 0, "" and "0" are false.
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::Number(number) => number.as_f64().is_some_and(|n| n != 0.0),
        Value::String(text) => !text.is_empty() && text != "0",
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// String form used for scalar comparisons.
pub fn render(value: &Value) -> String {
    match value {
        Value::Null => "undef".to_string(),
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

fn quoted(value: &Value) -> String {
    match value {
        Value::Null => "undef".to_string(),
        Value::String(text) => format!("'{text}'"),
        other => other.to_string(),
    }
}

fn compare(got: &Value, op: &str, expected: &Value) -> Result<bool, IsolateError> {
    let numeric = |value: &Value| {
        value
            .as_f64()
            .or_else(|| value.as_str().and_then(|text| text.trim().parse::<f64>().ok()))
            .ok_or_else(|| {
                IsolateError::Assertion(format!(
                    "cmp_ok {op} needs numbers, got {}",
                    quoted(value)
                ))
            })
    };
    let result = match op {
        "==" => numeric(got)? == numeric(expected)?,
        "!=" => numeric(got)? != numeric(expected)?,
        "<" => numeric(got)? < numeric(expected)?,
        "<=" => numeric(got)? <= numeric(expected)?,
        ">" => numeric(got)? > numeric(expected)?,
        ">=" => numeric(got)? >= numeric(expected)?,
        "eq" => render(got) == render(expected),
        "ne" => render(got) != render(expected),
        "lt" => render(got) < render(expected),
        "le" => render(got) <= render(expected),
        "gt" => render(got) > render(expected),
        "ge" => render(got) >= render(expected),
        other => {
            return Err(IsolateError::Assertion(format!(
                "cmp_ok does not support operator {other:?}"
            )))
        }
    };
    Ok(result)
}

fn first_difference(got: &Value, expected: &Value, path: &str) -> Option<(String, String, String)> {
    match (got, expected) {
        (Value::Array(left), Value::Array(right)) => {
            for index in 0..left.len().max(right.len()) {
                let child = format!("{path}[{index}]");
                match (left.get(index), right.get(index)) {
                    (Some(l), Some(r)) => {
                        if let Some(found) = first_difference(l, r, &child) {
                            return Some(found);
                        }
                    }
                    (l, r) => return Some((child, describe(l), describe(r))),
                }
            }
            None
        }
        (Value::Object(left), Value::Object(right)) => {
            let mut keys = left.keys().chain(right.keys()).collect::<Vec<_>>();
            keys.sort();
            keys.dedup();
            for key in keys {
                let child = format!("{path}{{{key}}}");
                match (left.get(key), right.get(key)) {
                    (Some(l), Some(r)) => {
                        if let Some(found) = first_difference(l, r, &child) {
                            return Some(found);
                        }
                    }
                    (l, r) => return Some((child, describe(l), describe(r))),
                }
            }
            None
        }
        (left, right) if left == right => None,
        (left, right) => Some((path.to_string(), quoted(left), quoted(right))),
    }
}

fn describe(value: Option<&Value>) -> String {
    value.map_or_else(|| "Does not exist".to_string(), quoted)
}
