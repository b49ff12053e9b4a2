//! Inline JSON page bodies

use serde_json::{Map, Value};

use crate::data::types::Row;
use crate::domain::query::Paging;

/// Body of an inline JSON page
///
/// `rows` holds up to one row beyond the page; its presence means another
/// page exists and adds `nextId` (keyset) or `nextOffset` (page number).
pub fn page_body(mut rows: Vec<Row>, paging: Paging, id_alias: &str) -> Value {
    let page_size = usize::try_from(paging.page_size()).unwrap_or(usize::MAX);
    let extra = if rows.len() > page_size {
        rows.drain(page_size..).next()
    } else {
        None
    };

    let mut body = Map::new();
    body.insert(
        "data".into(),
        Value::Array(rows.into_iter().map(Value::Object).collect()),
    );
    if let Some(extra) = extra {
        match paging {
            Paging::Keyset { .. } => {
                if let Some(next) = extra.get(id_alias).and_then(Value::as_i64) {
                    body.insert("nextId".into(), Value::from(next));
                }
            }
            Paging::Offset { page_number, .. } => {
                body.insert("nextOffset".into(), Value::from(page_number + 1));
            }
        }
    }
    Value::Object(body)
}
