//! Decoder for the positional push protocol.
//!
//! Every inbound frame is a JSON array `[channel, sequence, entries]`. Each entry
//! is itself an array led by a one-character tag, and the same tag can mean
//! different things on different channels (`o` is a book delta on a market
//! channel and an order transition on the account channel). Decoding is driven
//! by a fixed table keyed by `(ChannelKind, tag)`.

use rust_decimal::Decimal;
use serde_json::{json, Map, Value};
use thiserror::Error;

use crate::shared::{format_decimal, parse_decimal, BookSide, ChannelId, MarketRef, Side};
use crate::websocket::types::{
    AccountUpdate, ChannelUpdate, MarketUpdate, OpenOrder, OrderBookDelta, OrderTransition,
    TradeEvent, TransitionKind,
};

// ============================================================================
// ERRORS
// ============================================================================

/// Malformed frame or entry. Entry-level errors are logged and skipped.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("invalid JSON: {0}")]
    Json(String),

    #[error("frame is not a JSON array")]
    NotAnArray,

    #[error("frame has no channel id")]
    MissingChannel,

    #[error("server error: {0}")]
    Server(String),

    #[error("entry is not a tagged array: {0}")]
    MalformedEntry(String),

    #[error("unknown tag '{tag}' on {kind} channel")]
    UnknownTag { kind: ChannelKind, tag: String },

    #[error("entry '{tag}' needs {expected} fields, got {actual}")]
    Arity {
        tag: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("{field} must be a decimal string, got {value}")]
    NotDecimalString { field: &'static str, value: String },

    #[error("invalid {field}: {value}")]
    InvalidScalar { field: &'static str, value: String },

    #[error("{field} overflows a decimal")]
    Overflow { field: &'static str },
}

impl From<serde_json::Error> for DecodeError {
    fn from(err: serde_json::Error) -> Self {
        DecodeError::Json(err.to_string())
    }
}

/// Result type alias for decoding
pub type DecodeResult<T> = Result<T, DecodeError>;

// ============================================================================
// FRAMES AND ENTRIES
// ============================================================================

/// Channel class, which selects the entry decoders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    /// Trading pair feed
    Market,
    /// Private account feed (channel 1000)
    Account,
    /// Ticker, volume and heartbeat channels; entries are not decoded
    System,
}

impl ChannelKind {
    pub fn of(channel: ChannelId) -> Self {
        match channel.0 {
            1000 => Self::Account,
            1001..=1099 => Self::System,
            _ => Self::Market,
        }
    }
}

impl std::fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Market => write!(f, "market"),
            Self::Account => write!(f, "account"),
            Self::System => write!(f, "system"),
        }
    }
}

/// One wire message with its entries still undecoded.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub channel: ChannelId,
    /// Zero when the frame carries no sequence (heartbeats)
    pub sequence: i64,
    pub entries: Vec<Value>,
}

/// One decoded entry.
#[derive(Debug, Clone, PartialEq)]
pub enum Entry {
    /// `i`: full book, asks ascending then bids descending
    Snapshot {
        currency_pair: String,
        levels: Vec<OrderBookDelta>,
    },
    /// `o` on a market channel
    BookDelta(OrderBookDelta),
    /// `t` on a market channel
    Trade(TradeEvent),
    /// `p`
    PendingOrder(OpenOrder),
    /// `n`
    NewOrder(OpenOrder),
    /// `o` on the account channel
    Transition(OrderTransition),
    /// Recognised but unused (`b`, `f`, `m`, account `t`)
    Ignored(char),
}

// ============================================================================
// DISPATCH TABLE
// ============================================================================

type EntryDecoder = fn(&[Value]) -> DecodeResult<Entry>;

/// `(kind, tag, minimum field count including the tag, decoder)`.
///
/// Trailing fields past the minimum are tolerated; the exchange appends
/// fields (dates, client ids) to some entries over time.
const DECODERS: &[(ChannelKind, &str, usize, EntryDecoder)] = &[
    (ChannelKind::Market, "i", 2, decode_snapshot),
    (ChannelKind::Market, "o", 4, decode_book_delta),
    (ChannelKind::Market, "t", 6, decode_trade),
    (ChannelKind::Account, "p", 6, decode_pending_order),
    (ChannelKind::Account, "n", 6, decode_new_order),
    (ChannelKind::Account, "o", 4, decode_transition),
    (ChannelKind::Account, "b", 2, decode_ignored),
    (ChannelKind::Account, "f", 2, decode_ignored),
    (ChannelKind::Account, "m", 2, decode_ignored),
    (ChannelKind::Account, "t", 2, decode_ignored),
];

fn lookup(kind: ChannelKind, tag: &str) -> Option<(&'static str, usize, EntryDecoder)> {
    DECODERS
        .iter()
        .find(|(k, t, _, _)| *k == kind && *t == tag)
        .map(|(_, t, arity, decoder)| (*t, *arity, *decoder))
}

// ============================================================================
// DECODING
// ============================================================================

/// Split a raw message into channel, sequence and raw entries.
///
/// Heartbeats (`[1010]`) and subscription acks (`[1002, 1]`) decode to frames
/// with no entries. An `{"error": ...}` object becomes [`DecodeError::Server`].
pub fn decode(raw: &str) -> DecodeResult<Frame> {
    let value: Value = serde_json::from_str(raw)?;

    let items = match value {
        Value::Array(items) => items,
        Value::Object(map) => {
            return Err(match map.get("error") {
                Some(err) => DecodeError::Server(scalar_text(err)),
                None => DecodeError::NotAnArray,
            })
        }
        _ => return Err(DecodeError::NotAnArray),
    };

    let mut items = items.into_iter();
    let channel = match items.next() {
        Some(v) => channel_field(&v)?,
        None => return Err(DecodeError::MissingChannel),
    };
    let sequence = match items.next() {
        Some(Value::Null) | None => 0,
        Some(Value::String(s)) if s.is_empty() => 0,
        Some(v) => int_field(&v, "sequence")?,
    };
    let entries = match items.next() {
        Some(Value::Array(entries)) => entries,
        // absent, null, or bare scalars on system channels
        _ => Vec::new(),
    };

    Ok(Frame {
        channel,
        sequence,
        entries,
    })
}

/// Decode one entry for the given channel kind.
pub fn decode_entry(kind: ChannelKind, raw: &Value) -> DecodeResult<Entry> {
    let fields = match raw.as_array() {
        Some(fields) if fields.len() >= 2 => fields,
        _ => return Err(DecodeError::MalformedEntry(raw.to_string())),
    };
    let tag = fields[0]
        .as_str()
        .ok_or_else(|| DecodeError::MalformedEntry(raw.to_string()))?;

    let (tag, arity, decoder) = lookup(kind, tag).ok_or_else(|| DecodeError::UnknownTag {
        kind,
        tag: tag.to_string(),
    })?;

    if fields.len() < arity {
        return Err(DecodeError::Arity {
            tag,
            expected: arity,
            actual: fields.len(),
        });
    }

    decoder(fields)
}

/// Aggregate a frame into at most one update for its channel.
///
/// Market frames yield an update only when they carry a delta or trade and a
/// positive sequence. Account frames always yield one. Bad entries are logged
/// and skipped.
pub fn aggregate(frame: &Frame) -> Option<ChannelUpdate> {
    match ChannelKind::of(frame.channel) {
        ChannelKind::System => None,
        ChannelKind::Account => {
            let mut update = AccountUpdate {
                sequence: frame.sequence,
                ..Default::default()
            };
            for entry in decoded_entries(ChannelKind::Account, frame) {
                match entry {
                    Entry::PendingOrder(order) => update.pending_orders.push(order),
                    Entry::NewOrder(order) => update.new_orders.push(order),
                    Entry::Transition(t) => update.order_transitions.push(t),
                    _ => {}
                }
            }
            Some(ChannelUpdate::Account(update))
        }
        ChannelKind::Market => {
            let mut update = MarketUpdate {
                sequence: frame.sequence,
                ..Default::default()
            };
            for entry in decoded_entries(ChannelKind::Market, frame) {
                match entry {
                    Entry::Snapshot { levels, .. } => {
                        update.is_snapshot = true;
                        update.order_book_deltas.extend(levels);
                    }
                    Entry::BookDelta(delta) => update.order_book_deltas.push(delta),
                    Entry::Trade(trade) => update.trades.push(trade),
                    _ => {}
                }
            }
            if update.is_empty() || frame.sequence <= 0 {
                return None;
            }
            Some(ChannelUpdate::Market(update))
        }
    }
}

fn decoded_entries(kind: ChannelKind, frame: &Frame) -> impl Iterator<Item = Entry> + '_ {
    frame
        .entries
        .iter()
        .filter_map(move |raw| match decode_entry(kind, raw) {
            Ok(entry) => Some(entry),
            Err(e) => {
                tracing::warn!(channel = %frame.channel, error = %e, "Skipping malformed entry");
                None
            }
        })
}

// ─── Entry decoders ─────────────────────────────────────────────────────────

fn decode_snapshot(fields: &[Value]) -> DecodeResult<Entry> {
    let body = fields[1]
        .as_object()
        .ok_or_else(|| invalid("snapshot", &fields[1]))?;
    let currency_pair = body
        .get("currencyPair")
        .map(scalar_text)
        .unwrap_or_default();
    let book = body
        .get("orderBook")
        .and_then(Value::as_array)
        .filter(|sides| sides.len() >= 2)
        .ok_or_else(|| invalid("orderBook", &fields[1]))?;

    let mut asks = book_side(&book[0], BookSide::Ask)?;
    let mut bids = book_side(&book[1], BookSide::Bid)?;
    asks.sort_by(|a, b| a.price.cmp(&b.price));
    bids.sort_by(|a, b| b.price.cmp(&a.price));
    asks.extend(bids);

    Ok(Entry::Snapshot {
        currency_pair,
        levels: asks,
    })
}

fn book_side(levels: &Value, side: BookSide) -> DecodeResult<Vec<OrderBookDelta>> {
    let levels = levels
        .as_object()
        .ok_or_else(|| invalid("orderBook", levels))?;
    levels
        .iter()
        .map(|(price, size)| {
            Ok(OrderBookDelta {
                side,
                price: parse_decimal(price).map_err(|_| DecodeError::InvalidScalar {
                    field: "price",
                    value: price.clone(),
                })?,
                size: decimal_field(size, "size")?,
            })
        })
        .collect()
}

fn decode_ignored(fields: &[Value]) -> DecodeResult<Entry> {
    let tag = fields[0].as_str().and_then(|t| t.chars().next()).unwrap_or('?');
    Ok(Entry::Ignored(tag))
}

fn decode_book_delta(fields: &[Value]) -> DecodeResult<Entry> {
    let side = match side_field(&fields[1], "side")? {
        Side::Buy => BookSide::Bid,
        Side::Sell => BookSide::Ask,
    };
    Ok(Entry::BookDelta(OrderBookDelta {
        side,
        price: decimal_field(&fields[2], "price")?,
        size: decimal_field(&fields[3], "size")?,
    }))
}

fn decode_trade(fields: &[Value]) -> DecodeResult<Entry> {
    Ok(Entry::Trade(TradeEvent {
        trade_id: scalar_text(&fields[1]),
        side: side_field(&fields[2], "side")?,
        price: decimal_field(&fields[3], "price")?,
        size: decimal_field(&fields[4], "size")?,
        timestamp: int_field(&fields[5], "timestamp")?,
    }))
}

fn decode_pending_order(fields: &[Value]) -> DecodeResult<Entry> {
    OpenOrder::new(
        int_field(&fields[1], "orderNumber")?,
        market_field(&fields[2])?,
        side_field(&fields[5], "type")?,
        decimal_field(&fields[3], "rate")?,
        decimal_field(&fields[4], "amount")?,
    )
    .map(Entry::PendingOrder)
    .ok_or(DecodeError::Overflow { field: "total" })
}

fn decode_new_order(fields: &[Value]) -> DecodeResult<Entry> {
    OpenOrder::new(
        int_field(&fields[2], "orderNumber")?,
        market_field(&fields[1])?,
        side_field(&fields[3], "type")?,
        decimal_field(&fields[4], "rate")?,
        decimal_field(&fields[5], "amount")?,
    )
    .map(Entry::NewOrder)
    .ok_or(DecodeError::Overflow { field: "total" })
}

fn decode_transition(fields: &[Value]) -> DecodeResult<Entry> {
    let remaining_amount = decimal_field(&fields[2], "amount")?;
    let kind = match fields[3].as_str() {
        Some("f") | Some("s") if remaining_amount <= Decimal::ZERO => TransitionKind::Filled,
        Some("f") | Some("s") => TransitionKind::PartiallyFilled,
        Some("c") => TransitionKind::Canceled,
        _ => TransitionKind::Other,
    };
    Ok(Entry::Transition(OrderTransition {
        order_number: int_field(&fields[1], "orderNumber")?,
        kind,
        remaining_amount,
    }))
}

// ─── Scalar coercions ───────────────────────────────────────────────────────

fn invalid(field: &'static str, value: &Value) -> DecodeError {
    DecodeError::InvalidScalar {
        field,
        value: value.to_string(),
    }
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn decimal_field(value: &Value, field: &'static str) -> DecodeResult<Decimal> {
    let text = value.as_str().ok_or_else(|| DecodeError::NotDecimalString {
        field,
        value: value.to_string(),
    })?;
    parse_decimal(text).map_err(|_| invalid(field, value))
}

fn int_field(value: &Value, field: &'static str) -> DecodeResult<i64> {
    match value {
        Value::Number(n) => n.as_i64().ok_or_else(|| invalid(field, value)),
        Value::String(s) => s.trim().parse().map_err(|_| invalid(field, value)),
        _ => Err(invalid(field, value)),
    }
}

fn channel_field(value: &Value) -> DecodeResult<ChannelId> {
    let id = int_field(value, "channel")?;
    u32::try_from(id)
        .map(ChannelId)
        .map_err(|_| invalid("channel", value))
}

fn side_field(value: &Value, field: &'static str) -> DecodeResult<Side> {
    match int_field(value, field)? {
        0 => Ok(Side::Sell),
        1 => Ok(Side::Buy),
        _ => Err(invalid(field, value)),
    }
}

fn market_field(value: &Value) -> DecodeResult<MarketRef> {
    match value {
        Value::Number(_) => {
            let id = int_field(value, "market")?;
            u32::try_from(id)
                .map(MarketRef::Id)
                .map_err(|_| invalid("market", value))
        }
        Value::String(s) => Ok(match s.parse::<u32>() {
            Ok(id) => MarketRef::Id(id),
            Err(_) => MarketRef::Symbol(s.clone()),
        }),
        _ => Err(invalid("market", value)),
    }
}

// ============================================================================
// ENCODING
// ============================================================================

fn side_flag(side: Side) -> u8 {
    match side {
        Side::Buy => 1,
        Side::Sell => 0,
    }
}

fn market_value(market: &MarketRef) -> Value {
    match market {
        MarketRef::Id(id) => json!(id),
        MarketRef::Symbol(symbol) => json!(symbol),
    }
}

/// Wire form of an entry, the inverse of [`decode_entry`].
pub fn encode_entry(entry: &Entry) -> Value {
    match entry {
        Entry::Snapshot {
            currency_pair,
            levels,
        } => {
            let mut asks = Map::new();
            let mut bids = Map::new();
            for level in levels {
                let side = match level.side {
                    BookSide::Ask => &mut asks,
                    BookSide::Bid => &mut bids,
                };
                side.insert(level.price.to_string(), json!(level.size.to_string()));
            }
            json!(["i", {"currencyPair": currency_pair, "orderBook": [asks, bids]}])
        }
        Entry::BookDelta(delta) => {
            let side = match delta.side {
                BookSide::Bid => 1,
                BookSide::Ask => 0,
            };
            json!(["o", side, delta.price.to_string(), delta.size.to_string()])
        }
        Entry::Trade(trade) => json!([
            "t",
            trade.trade_id,
            side_flag(trade.side),
            trade.price.to_string(),
            trade.size.to_string(),
            trade.timestamp
        ]),
        Entry::PendingOrder(order) => json!([
            "p",
            order.order_number,
            market_value(&order.market),
            order.rate.to_string(),
            order.amount.to_string(),
            side_flag(order.side).to_string()
        ]),
        Entry::NewOrder(order) => json!([
            "n",
            market_value(&order.market),
            order.order_number.to_string(),
            side_flag(order.side).to_string(),
            order.rate.to_string(),
            order.amount.to_string()
        ]),
        Entry::Transition(t) => {
            let kind = match t.kind {
                TransitionKind::Filled | TransitionKind::PartiallyFilled => "f",
                TransitionKind::Canceled => "c",
                TransitionKind::Other => "u",
            };
            json!([
                "o",
                t.order_number.to_string(),
                t.remaining_amount.to_string(),
                kind
            ])
        }
        Entry::Ignored(tag) => json!([tag.to_string(), ""]),
    }
}

/// Wire form of a whole message. Channel and sequence go out as strings, the
/// way the account channel sends them.
pub fn encode_frame(channel: ChannelId, sequence: i64, entries: &[Entry]) -> String {
    let entries: Vec<Value> = entries.iter().map(encode_entry).collect();
    json!([channel.to_string(), sequence.to_string(), entries]).to_string()
}

/// Human-readable summary of an update for logs.
pub fn describe(update: &ChannelUpdate) -> String {
    match update {
        ChannelUpdate::Market(m) => format!(
            "seq={} snapshot={} deltas={} trades={}",
            m.sequence,
            m.is_snapshot,
            m.order_book_deltas.len(),
            m.trades.len()
        ),
        ChannelUpdate::Account(a) => format!(
            "seq={} pending={} new={} transitions={}",
            a.sequence,
            a.pending_orders.len(),
            a.new_orders.len(),
            a.order_transitions
                .iter()
                .map(|t| format!("{}:{}", t.order_number, format_decimal(&t.remaining_amount)))
                .collect::<Vec<_>>()
                .join(",")
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn account(raw: &str) -> AccountUpdate {
        match aggregate(&decode(raw).unwrap()) {
            Some(ChannelUpdate::Account(update)) => update,
            other => panic!("expected account update, got {:?}", other),
        }
    }

    fn market(raw: &str) -> Option<MarketUpdate> {
        match aggregate(&decode(raw).unwrap()) {
            Some(ChannelUpdate::Market(update)) => Some(update),
            None => None,
            other => panic!("expected market update, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_frame_string_scalars() {
        let frame = decode(r#"["1000","5",[["n","BTC_ETH","12345","0","0.01","1.0"]]]"#).unwrap();
        assert_eq!(frame.channel, ChannelId::ACCOUNT);
        assert_eq!(frame.sequence, 5);
        assert_eq!(frame.entries.len(), 1);
    }

    #[test]
    fn test_decode_heartbeat_and_ack() {
        let hb = decode("[1010]").unwrap();
        assert_eq!(hb.channel, ChannelId::HEARTBEAT);
        assert_eq!(hb.sequence, 0);
        assert!(hb.entries.is_empty());
        assert_eq!(aggregate(&hb), None);

        let ack = decode("[148,1]").unwrap();
        assert_eq!(ack.sequence, 1);
        assert_eq!(aggregate(&ack), None);
    }

    #[test]
    fn test_decode_frame_errors() {
        assert!(matches!(decode("not json"), Err(DecodeError::Json(_))));
        assert_eq!(decode("[]"), Err(DecodeError::MissingChannel));
        assert_eq!(decode("42"), Err(DecodeError::NotAnArray));
        assert_eq!(
            decode(r#"{"error":"Permission denied."}"#),
            Err(DecodeError::Server("Permission denied.".into()))
        );
        assert!(matches!(
            decode(r#"["abc",1,[]]"#),
            Err(DecodeError::InvalidScalar { field: "channel", .. })
        ));
    }

    #[test]
    fn test_new_order_entry() {
        let update = account(r#"["1000","5",[["n","BTC_ETH","12345","0","0.01","1.0"]]]"#);
        assert_eq!(update.sequence, 5);
        assert_eq!(update.new_orders.len(), 1);

        let order = &update.new_orders[0];
        assert_eq!(order.order_number, 12345);
        assert_eq!(order.market, MarketRef::Symbol("BTC_ETH".into()));
        assert_eq!(order.side, Side::Sell);
        assert_eq!(order.rate, dec!(0.01));
        assert_eq!(order.amount, dec!(1.0));
        assert_eq!(order.total, dec!(0.01));
    }

    #[test]
    fn test_pending_order_entry() {
        let update = account(r#"[1000,"",[["p",789,148,"0.5","2","1"]]]"#);
        assert_eq!(update.sequence, 0);
        let order = &update.pending_orders[0];
        assert_eq!(order.order_number, 789);
        assert_eq!(order.market, MarketRef::Id(148));
        assert_eq!(order.side, Side::Buy);
        assert_eq!(order.total, dec!(1.0));
    }

    #[test]
    fn test_transition_kinds() {
        let update = account(
            r#"["1000","6",[
                ["o","1","0","f"],
                ["o","2","0.5","f"],
                ["o","3","0.00000000","s"],
                ["o","4","1","c"],
                ["o","5","1","x"]
            ]]"#,
        );
        let kinds: Vec<_> = update.order_transitions.iter().map(|t| t.kind).collect();
        assert_eq!(
            kinds,
            vec![
                TransitionKind::Filled,
                TransitionKind::PartiallyFilled,
                TransitionKind::Filled,
                TransitionKind::Canceled,
                TransitionKind::Other,
            ]
        );
        assert_eq!(update.order_transitions[1].remaining_amount, dec!(0.5));
    }

    #[test]
    fn test_account_ignores_balance_tags() {
        let update = account(r#"[1000,"7",[["b",28,"e","-0.06"],["m",28,"0.1"]]]"#);
        assert_eq!(update, AccountUpdate {
            sequence: 7,
            ..Default::default()
        });
    }

    #[test]
    fn test_malformed_entry_does_not_abort_message() {
        let update = account(
            r#"["1000","8",[
                ["n","BTC_ETH","1","0",0.01,"1.0"],
                ["x"],
                [1,2,3],
                "junk",
                ["n","BTC_ETH","2","1","0.02","3"]
            ]]"#,
        );
        assert_eq!(update.new_orders.len(), 1);
        assert_eq!(update.new_orders[0].order_number, 2);
    }

    #[test]
    fn test_overflowing_total_skips_only_that_entry() {
        let huge = r#"["n","BTC_ETH","1","0","79228162514264337593543950335","2"]"#;
        let raw: Value = serde_json::from_str(huge).unwrap();
        assert_eq!(
            decode_entry(ChannelKind::Account, &raw),
            Err(DecodeError::Overflow { field: "total" })
        );

        let pending: Value =
            serde_json::from_str(r#"["p","3",148,"79228162514264337593543950335","2","0"]"#).unwrap();
        assert_eq!(
            decode_entry(ChannelKind::Account, &pending),
            Err(DecodeError::Overflow { field: "total" })
        );

        let update = account(&format!(
            r#"["1000","5",[{},["n","BTC_ETH","2","1","0.01","1"]]]"#,
            huge
        ));
        assert_eq!(update.new_orders.len(), 1);
        assert_eq!(update.new_orders[0].order_number, 2);
        assert_eq!(update.new_orders[0].total, dec!(0.01));
    }

    #[test]
    fn test_decimal_slot_rejects_numbers() {
        let raw: Value = serde_json::from_str(r#"["o",1,0.5,"1"]"#).unwrap();
        assert!(matches!(
            decode_entry(ChannelKind::Market, &raw),
            Err(DecodeError::NotDecimalString { field: "price", .. })
        ));
    }

    #[test]
    fn test_arity_and_unknown_tag() {
        let short: Value = serde_json::from_str(r#"["t","1",1,"0.5"]"#).unwrap();
        assert_eq!(
            decode_entry(ChannelKind::Market, &short),
            Err(DecodeError::Arity {
                tag: "t",
                expected: 6,
                actual: 4
            })
        );

        let pending_on_market: Value = serde_json::from_str(r#"["p",1,148,"1","1","1"]"#).unwrap();
        assert!(matches!(
            decode_entry(ChannelKind::Market, &pending_on_market),
            Err(DecodeError::UnknownTag { .. })
        ));
    }

    #[test]
    fn test_market_aggregation() {
        let update = market(
            r#"[148,"571",[
                ["o",1,"0.0250","1.5"],
                ["o",0,"0.0260","0"],
                ["t","42",1,"0.0255","0.1",1700000000]
            ]]"#,
        )
        .unwrap();

        assert_eq!(update.sequence, 571);
        assert!(!update.is_snapshot);
        assert_eq!(update.order_book_deltas.len(), 2);
        assert_eq!(update.order_book_deltas[0].side, BookSide::Bid);
        assert!(update.order_book_deltas[1].is_removal());
        assert_eq!(update.trades[0].trade_id, "42");
        assert_eq!(update.trades[0].timestamp, 1_700_000_000);
    }

    #[test]
    fn test_market_update_requires_positive_sequence() {
        assert!(market(r#"[148,0,[["o",1,"0.0250","1.5"]]]"#).is_none());
        assert!(market(r#"[148,5,[]]"#).is_none());
        assert!(market(r#"[148,5,[["o",1,0.025,"1.5"]]]"#).is_none());
    }

    #[test]
    fn test_snapshot_entry() {
        let update = market(
            r#"[148,100,[["i",{"currencyPair":"BTC_ETH","orderBook":[
                {"0.0260":"2","0.0255":"1"},
                {"0.0250":"3","0.0251":"4"}
            ]}]]]"#,
        )
        .unwrap();

        assert!(update.is_snapshot);
        let prices: Vec<_> = update
            .order_book_deltas
            .iter()
            .map(|d| (d.side, d.price))
            .collect();
        assert_eq!(
            prices,
            vec![
                (BookSide::Ask, dec!(0.0255)),
                (BookSide::Ask, dec!(0.0260)),
                (BookSide::Bid, dec!(0.0251)),
                (BookSide::Bid, dec!(0.0250)),
            ]
        );
    }

    #[test]
    fn test_system_channels_not_decoded() {
        let frame = decode(r#"[1002,null,[149,"382.98901522","381.99755898"]]"#).unwrap();
        assert_eq!(ChannelKind::of(frame.channel), ChannelKind::System);
        assert_eq!(aggregate(&frame), None);
    }

    #[test]
    fn test_round_trip_every_tag() {
        let order = OpenOrder::new(
            12345,
            MarketRef::Symbol("BTC_ETH".into()),
            Side::Buy,
            dec!(0.01),
            dec!(1.0),
        )
        .unwrap();
        let cases = vec![
            (
                ChannelKind::Market,
                Entry::Snapshot {
                    currency_pair: "BTC_ETH".into(),
                    levels: vec![
                        OrderBookDelta { side: BookSide::Ask, price: dec!(0.0255), size: dec!(1) },
                        OrderBookDelta { side: BookSide::Ask, price: dec!(0.026), size: dec!(2) },
                        OrderBookDelta { side: BookSide::Bid, price: dec!(0.0251), size: dec!(4) },
                    ],
                },
            ),
            (
                ChannelKind::Market,
                Entry::BookDelta(OrderBookDelta {
                    side: BookSide::Ask,
                    price: dec!(0.0260),
                    size: dec!(0),
                }),
            ),
            (
                ChannelKind::Market,
                Entry::Trade(TradeEvent {
                    trade_id: "42".into(),
                    side: Side::Sell,
                    price: dec!(0.0255),
                    size: dec!(0.1),
                    timestamp: 1_700_000_000,
                }),
            ),
            (ChannelKind::Account, Entry::PendingOrder(OpenOrder {
                market: MarketRef::Id(148),
                ..order.clone()
            })),
            (ChannelKind::Account, Entry::NewOrder(order)),
            (
                ChannelKind::Account,
                Entry::Transition(OrderTransition {
                    order_number: 12345,
                    kind: TransitionKind::PartiallyFilled,
                    remaining_amount: dec!(0.25),
                }),
            ),
            (
                ChannelKind::Account,
                Entry::Transition(OrderTransition {
                    order_number: 12345,
                    kind: TransitionKind::Canceled,
                    remaining_amount: dec!(0.25),
                }),
            ),
            (ChannelKind::Account, Entry::Ignored('b')),
        ];

        for (kind, entry) in cases {
            let wire = encode_entry(&entry);
            assert_eq!(decode_entry(kind, &wire).unwrap(), entry, "wire: {}", wire);
        }
    }

    #[test]
    fn test_encode_frame_decodes() {
        let raw = encode_frame(
            ChannelId::ACCOUNT,
            6,
            &[Entry::Transition(OrderTransition {
                order_number: 12345,
                kind: TransitionKind::Filled,
                remaining_amount: dec!(0),
            })],
        );
        assert_eq!(raw, r#"["1000","6",[["o","12345","0","f"]]]"#);

        let update = account(&raw);
        assert!(update.order_transitions[0].is_complete_fill());
    }
}
