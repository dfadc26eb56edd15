//! Stream commands (XADD, XREADGROUP, XACK, XPENDING, XGROUP CREATE).

use std::time::Duration;

use bytes::Bytes;

use crate::commands::{arg, exec};
use crate::connection::Connection;
use crate::error::{Error, Result};
use crate::types::{ToArg, Value};

/// One stream entry as returned by XRANGE/XREADGROUP.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEntry {
    /// Entry id in `ms-seq` form.
    pub id: String,
    /// Field/value pairs in server order. Empty when the entry was deleted
    /// while still pending.
    pub fields: Vec<(Bytes, Bytes)>,
}

/// XPENDING summary form.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PendingSummaryReply {
    /// Total pending entries in the group.
    pub count: u64,
    /// Smallest pending id.
    pub lowest: Option<String>,
    /// Largest pending id.
    pub highest: Option<String>,
    /// Pending entries per consumer.
    pub consumers: Vec<(String, u64)>,
}

/// One row of the XPENDING extended form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingEntryReply {
    /// Entry id.
    pub id: String,
    /// Owning consumer.
    pub consumer: String,
    /// Time since last delivery.
    pub idle: Duration,
    /// Number of deliveries so far.
    pub delivery_count: u64,
}

/// `XADD key * field value [field value ...]`
pub fn xadd_args<F: ToArg, V: ToArg>(key: impl ToArg, fields: &[(F, V)]) -> Vec<Bytes> {
    let mut args = Vec::with_capacity(3 + fields.len() * 2);
    args.push(Bytes::from_static(b"XADD"));
    args.push(arg(key));
    args.push(Bytes::from_static(b"*"));
    for (f, v) in fields {
        args.push(f.to_arg());
        args.push(v.to_arg());
    }
    args
}

/// `XREADGROUP GROUP group consumer [COUNT n] STREAMS key id`
///
/// `id` is `>` for entries never delivered to any consumer, or an explicit id
/// (usually `0`) to re-read this consumer's pending entries.
pub fn xreadgroup_args(
    group: impl ToArg,
    consumer: impl ToArg,
    count: Option<usize>,
    key: impl ToArg,
    id: impl ToArg,
) -> Vec<Bytes> {
    let mut args = vec![
        Bytes::from_static(b"XREADGROUP"),
        Bytes::from_static(b"GROUP"),
        arg(group),
        arg(consumer),
    ];
    if let Some(n) = count {
        args.push(Bytes::from_static(b"COUNT"));
        args.push(arg(n));
    }
    args.push(Bytes::from_static(b"STREAMS"));
    args.push(arg(key));
    args.push(arg(id));
    args
}

/// `XACK key group id [id ...]`
pub fn xack_args(key: impl ToArg, group: impl ToArg, ids: &[impl ToArg]) -> Vec<Bytes> {
    let mut args = vec![Bytes::from_static(b"XACK"), arg(key), arg(group)];
    args.extend(ids.iter().map(|id| id.to_arg()));
    args
}

/// XADD with an auto-generated id. Returns the id the server assigned.
pub async fn xadd<F: ToArg, V: ToArg>(
    conn: &mut Connection,
    key: impl ToArg,
    fields: &[(F, V)],
) -> Result<String> {
    if fields.is_empty() {
        return Err(Error::InvalidArgument(
            "XADD requires at least one field".into(),
        ));
    }
    exec(conn, xadd_args(key, fields)).await?.into_string()
}

/// XREADGROUP on a single stream. A nil reply (nothing to deliver) is an empty vec.
pub async fn xreadgroup(
    conn: &mut Connection,
    group: impl ToArg,
    consumer: impl ToArg,
    count: Option<usize>,
    key: impl ToArg,
    id: impl ToArg,
) -> Result<Vec<StreamEntry>> {
    let reply = exec(conn, xreadgroup_args(group, consumer, count, key, id)).await?;
    Ok(parse_read_reply(reply)?
        .into_iter()
        .flat_map(|(_, entries)| entries)
        .collect())
}

/// XACK. Returns how many of the ids were actually pending.
pub async fn xack(
    conn: &mut Connection,
    key: impl ToArg,
    group: impl ToArg,
    ids: &[impl ToArg],
) -> Result<i64> {
    exec(conn, xack_args(key, group, ids)).await?.into_integer()
}

/// XPENDING summary form.
pub async fn xpending_summary(
    conn: &mut Connection,
    key: impl ToArg,
    group: impl ToArg,
) -> Result<PendingSummaryReply> {
    let reply = exec(
        conn,
        vec![Bytes::from_static(b"XPENDING"), arg(key), arg(group)],
    )
    .await?;
    parse_pending_summary(reply)
}

/// XPENDING extended form over `start..=end`, optionally for one consumer.
pub async fn xpending_range(
    conn: &mut Connection,
    key: impl ToArg,
    group: impl ToArg,
    start: &str,
    end: &str,
    count: usize,
    consumer: Option<&str>,
) -> Result<Vec<PendingEntryReply>> {
    let mut args = vec![
        Bytes::from_static(b"XPENDING"),
        arg(key),
        arg(group),
        arg(start),
        arg(end),
        arg(count),
    ];
    if let Some(c) = consumer {
        args.push(arg(c));
    }
    let reply = exec(conn, args).await?;
    reply
        .into_array()?
        .into_iter()
        .map(parse_pending_row)
        .collect()
}

/// `XGROUP CREATE key group id [MKSTREAM]`
pub async fn xgroup_create(
    conn: &mut Connection,
    key: impl ToArg,
    group: impl ToArg,
    id: &str,
    mkstream: bool,
) -> Result<()> {
    let mut args = vec![
        Bytes::from_static(b"XGROUP"),
        Bytes::from_static(b"CREATE"),
        arg(key),
        arg(group),
        arg(id),
    ];
    if mkstream {
        args.push(Bytes::from_static(b"MKSTREAM"));
    }
    exec(conn, args).await?;
    Ok(())
}

/// Parse an `XREAD`/`XREADGROUP` reply into `(stream, entries)` pairs.
pub fn parse_read_reply(reply: Value) -> Result<Vec<(String, Vec<StreamEntry>)>> {
    reply
        .into_array()?
        .into_iter()
        .map(|stream| {
            let mut parts = stream.into_array()?.into_iter();
            let (Some(name), Some(entries)) = (parts.next(), parts.next()) else {
                return Err(Error::Protocol("stream reply needs name and entries".into()));
            };
            Ok((name.into_string()?, parse_entries(entries)?))
        })
        .collect()
}

/// Parse an array of `[id, [field, value, ...]]` entries.
pub fn parse_entries(reply: Value) -> Result<Vec<StreamEntry>> {
    reply
        .into_array()?
        .into_iter()
        .map(|entry| {
            let mut parts = entry.into_array()?.into_iter();
            let id = parts
                .next()
                .ok_or_else(|| Error::Protocol("stream entry without id".into()))?
                .into_string()?;
            let raw = parts.next().unwrap_or(Value::Nil).into_array()?;
            if raw.len() % 2 != 0 {
                return Err(Error::Protocol(format!(
                    "stream entry {} has an odd number of field elements",
                    id
                )));
            }
            let mut fields = Vec::with_capacity(raw.len() / 2);
            let mut it = raw.into_iter();
            while let (Some(f), Some(v)) = (it.next(), it.next()) {
                fields.push((f.into_bytes()?, v.into_bytes()?));
            }
            Ok(StreamEntry { id, fields })
        })
        .collect()
}

/// Parse the XPENDING summary form: `[count, lowest, highest, [[consumer, n], ...]]`.
pub fn parse_pending_summary(reply: Value) -> Result<PendingSummaryReply> {
    let mut parts = reply.into_array()?.into_iter();
    let count = parts
        .next()
        .ok_or_else(|| Error::Protocol("empty XPENDING reply".into()))?
        .into_integer()?;
    let lowest = optional_string(parts.next())?;
    let highest = optional_string(parts.next())?;
    let consumers = parts
        .next()
        .unwrap_or(Value::Nil)
        .into_array()?
        .into_iter()
        .map(|row| {
            let mut cols = row.into_array()?.into_iter();
            match (cols.next(), cols.next()) {
                (Some(name), Some(n)) => Ok((name.into_string()?, n.into_integer()? as u64)),
                _ => Err(Error::Protocol("malformed XPENDING consumer row".into())),
            }
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(PendingSummaryReply {
        count: count.max(0) as u64,
        lowest,
        highest,
        consumers,
    })
}

fn parse_pending_row(row: Value) -> Result<PendingEntryReply> {
    let mut cols = row.into_array()?.into_iter();
    match (cols.next(), cols.next(), cols.next(), cols.next()) {
        (Some(id), Some(consumer), Some(idle), Some(count)) => Ok(PendingEntryReply {
            id: id.into_string()?,
            consumer: consumer.into_string()?,
            idle: Duration::from_millis(idle.into_integer()?.max(0) as u64),
            delivery_count: count.into_integer()?.max(0) as u64,
        }),
        _ => Err(Error::Protocol("malformed XPENDING entry row".into())),
    }
}

fn optional_string(value: Option<Value>) -> Result<Option<String>> {
    match value {
        None | Some(Value::Nil) => Ok(None),
        Some(v) => v.into_string().map(Some),
    }
}
