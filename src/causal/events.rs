// =============================================================================
// Causal event records — fixed-layout binary wire format
// =============================================================================
//
// Every record is a fixed-size header followed by a fixed-size, type-specific
// payload, little-endian throughout:
//
//   header: event_id u64 | parent_id u64 | kind u8 | ts_ns u64 | symbol u32
//
// parent_id = 0 marks a root event (external input); every derived event
// points at the event that caused it, so the log forms a DAG. Floats are
// stored as raw IEEE-754 bits: encode → decode → encode is byte-identical,
// which the replay contract depends on.
// =============================================================================

use crate::error::{EngineError, EngineResult};

pub const HEADER_LEN: usize = 29;

// ---------------------------------------------------------------------------
// Kinds
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EventKind {
    SessionStart = 1,
    Tick = 2,
    Trade = 3,
    Depth = 4,
    Liquidation = 5,
    Cascade = 6,
    Risk = 7,
    OrderIntent = 8,
    VenueAck = 9,
    Fill = 10,
    Attribution = 11,
    Divergence = 12,
}

impl EventKind {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            1 => Some(Self::SessionStart),
            2 => Some(Self::Tick),
            3 => Some(Self::Trade),
            4 => Some(Self::Depth),
            5 => Some(Self::Liquidation),
            6 => Some(Self::Cascade),
            7 => Some(Self::Risk),
            8 => Some(Self::OrderIntent),
            9 => Some(Self::VenueAck),
            10 => Some(Self::Fill),
            11 => Some(Self::Attribution),
            12 => Some(Self::Divergence),
            _ => None,
        }
    }

    /// Fixed payload length for the kind.
    pub fn payload_len(self) -> usize {
        match self {
            Self::SessionStart => 9,
            Self::Tick => 32,
            Self::Trade => 17,
            Self::Depth => 16,
            Self::Liquidation => 25,
            Self::Cascade => 4,
            Self::Risk => 81,
            Self::OrderIntent => 18,
            Self::VenueAck => 5,
            Self::Fill => 17,
            Self::Attribution => 32,
            Self::Divergence => 17,
        }
    }
}

// ---------------------------------------------------------------------------
// Header & payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EventHeader {
    pub event_id: u64,
    pub parent_id: u64,
    pub kind: EventKind,
    pub ts_ns: u64,
    pub symbol_hash: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    SessionStart {
        wall_anchor_ms: i64,
        mode: u8,
    },
    Tick {
        bid: f64,
        ask: f64,
        bid_size: f64,
        ask_size: f64,
    },
    Trade {
        price: f64,
        qty: f64,
        is_buy: bool,
    },
    Depth {
        bid_depth: f64,
        ask_depth: f64,
    },
    Liquidation {
        price: f64,
        qty: f64,
        notional: f64,
        is_long: bool,
    },
    Cascade {
        /// 0 = none, 1 = buy, 2 = sell.
        side: u8,
        fired: bool,
        confirmation_count: u8,
        /// Bit 0 OFI, bit 1 depth, bit 2 liquidation, bit 3 impulse.
        confirm_mask: u8,
    },
    Risk {
        allow: bool,
        final_size: f64,
        requested_size: f64,
        /// regime, expectancy, slope, bucket, slippage, capture, portfolio,
        /// capital — chain order.
        mults: [f64; 8],
    },
    OrderIntent {
        is_buy: bool,
        price: f64,
        qty: f64,
        utc_hour: u8,
    },
    VenueAck {
        accepted: bool,
        venue_code: u32,
    },
    Fill {
        price: f64,
        qty: f64,
        is_buy: bool,
    },
    Attribution {
        pnl: f64,
        fee: f64,
        slippage: f64,
        hold_sec: f64,
    },
    Divergence {
        shadow_bps: f64,
        live_bps: f64,
        paused: bool,
    },
}

impl Payload {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::SessionStart { .. } => EventKind::SessionStart,
            Self::Tick { .. } => EventKind::Tick,
            Self::Trade { .. } => EventKind::Trade,
            Self::Depth { .. } => EventKind::Depth,
            Self::Liquidation { .. } => EventKind::Liquidation,
            Self::Cascade { .. } => EventKind::Cascade,
            Self::Risk { .. } => EventKind::Risk,
            Self::OrderIntent { .. } => EventKind::OrderIntent,
            Self::VenueAck { .. } => EventKind::VenueAck,
            Self::Fill { .. } => EventKind::Fill,
            Self::Attribution { .. } => EventKind::Attribution,
            Self::Divergence { .. } => EventKind::Divergence,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CausalEvent {
    pub header: EventHeader,
    pub payload: Payload,
}

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

fn put_f64(buf: &mut Vec<u8>, v: f64) {
    buf.extend_from_slice(&v.to_bits().to_le_bytes());
}

fn put_u64(buf: &mut Vec<u8>, v: u64) {
    buf.extend_from_slice(&v.to_le_bytes());
}

fn put_u32(buf: &mut Vec<u8>, v: u32) {
    buf.extend_from_slice(&v.to_le_bytes());
}

struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn take(&mut self, n: usize) -> EngineResult<&'a [u8]> {
        if self.pos + n > self.data.len() {
            return Err(EngineError::Invariant(
                "causal record truncated".to_string(),
            ));
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn f64(&mut self) -> EngineResult<f64> {
        let bytes: [u8; 8] = self.take(8)?.try_into().unwrap();
        Ok(f64::from_bits(u64::from_le_bytes(bytes)))
    }

    fn u64(&mut self) -> EngineResult<u64> {
        let bytes: [u8; 8] = self.take(8)?.try_into().unwrap();
        Ok(u64::from_le_bytes(bytes))
    }

    fn i64(&mut self) -> EngineResult<i64> {
        let bytes: [u8; 8] = self.take(8)?.try_into().unwrap();
        Ok(i64::from_le_bytes(bytes))
    }

    fn u32(&mut self) -> EngineResult<u32> {
        let bytes: [u8; 4] = self.take(4)?.try_into().unwrap();
        Ok(u32::from_le_bytes(bytes))
    }

    fn u8(&mut self) -> EngineResult<u8> {
        Ok(self.take(1)?[0])
    }
}

impl CausalEvent {
    pub fn new(header: EventHeader, payload: Payload) -> EngineResult<Self> {
        if header.kind != payload.kind() {
            return Err(EngineError::Invariant(format!(
                "event kind mismatch: header {:?} vs payload {:?}",
                header.kind,
                payload.kind()
            )));
        }
        Ok(Self { header, payload })
    }

    pub fn encoded_len(&self) -> usize {
        HEADER_LEN + self.header.kind.payload_len()
    }

    /// Serialise into the fixed binary layout.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.encoded_len());

        put_u64(&mut buf, self.header.event_id);
        put_u64(&mut buf, self.header.parent_id);
        buf.push(self.header.kind as u8);
        put_u64(&mut buf, self.header.ts_ns);
        put_u32(&mut buf, self.header.symbol_hash);

        match &self.payload {
            Payload::SessionStart {
                wall_anchor_ms,
                mode,
            } => {
                buf.extend_from_slice(&wall_anchor_ms.to_le_bytes());
                buf.push(*mode);
            }
            Payload::Tick {
                bid,
                ask,
                bid_size,
                ask_size,
            } => {
                put_f64(&mut buf, *bid);
                put_f64(&mut buf, *ask);
                put_f64(&mut buf, *bid_size);
                put_f64(&mut buf, *ask_size);
            }
            Payload::Trade { price, qty, is_buy } => {
                put_f64(&mut buf, *price);
                put_f64(&mut buf, *qty);
                buf.push(u8::from(*is_buy));
            }
            Payload::Depth {
                bid_depth,
                ask_depth,
            } => {
                put_f64(&mut buf, *bid_depth);
                put_f64(&mut buf, *ask_depth);
            }
            Payload::Liquidation {
                price,
                qty,
                notional,
                is_long,
            } => {
                put_f64(&mut buf, *price);
                put_f64(&mut buf, *qty);
                put_f64(&mut buf, *notional);
                buf.push(u8::from(*is_long));
            }
            Payload::Cascade {
                side,
                fired,
                confirmation_count,
                confirm_mask,
            } => {
                buf.push(*side);
                buf.push(u8::from(*fired));
                buf.push(*confirmation_count);
                buf.push(*confirm_mask);
            }
            Payload::Risk {
                allow,
                final_size,
                requested_size,
                mults,
            } => {
                buf.push(u8::from(*allow));
                put_f64(&mut buf, *final_size);
                put_f64(&mut buf, *requested_size);
                for m in mults {
                    put_f64(&mut buf, *m);
                }
            }
            Payload::OrderIntent {
                is_buy,
                price,
                qty,
                utc_hour,
            } => {
                buf.push(u8::from(*is_buy));
                put_f64(&mut buf, *price);
                put_f64(&mut buf, *qty);
                buf.push(*utc_hour);
            }
            Payload::VenueAck {
                accepted,
                venue_code,
            } => {
                buf.push(u8::from(*accepted));
                put_u32(&mut buf, *venue_code);
            }
            Payload::Fill { price, qty, is_buy } => {
                put_f64(&mut buf, *price);
                put_f64(&mut buf, *qty);
                buf.push(u8::from(*is_buy));
            }
            Payload::Attribution {
                pnl,
                fee,
                slippage,
                hold_sec,
            } => {
                put_f64(&mut buf, *pnl);
                put_f64(&mut buf, *fee);
                put_f64(&mut buf, *slippage);
                put_f64(&mut buf, *hold_sec);
            }
            Payload::Divergence {
                shadow_bps,
                live_bps,
                paused,
            } => {
                put_f64(&mut buf, *shadow_bps);
                put_f64(&mut buf, *live_bps);
                buf.push(u8::from(*paused));
            }
        }

        debug_assert_eq!(buf.len(), self.encoded_len());
        buf
    }

    /// Decode one record from `data`. Returns the event and the bytes
    /// consumed.
    pub fn decode(data: &[u8]) -> EngineResult<(Self, usize)> {
        let mut c = Cursor::new(data);

        let event_id = c.u64()?;
        let parent_id = c.u64()?;
        let kind_raw = c.u8()?;
        let ts_ns = c.u64()?;
        let symbol_hash = c.u32()?;

        let kind = EventKind::from_u8(kind_raw).ok_or_else(|| {
            EngineError::Invariant(format!("unknown causal event kind {kind_raw}"))
        })?;

        let payload = match kind {
            EventKind::SessionStart => Payload::SessionStart {
                wall_anchor_ms: c.i64()?,
                mode: c.u8()?,
            },
            EventKind::Tick => Payload::Tick {
                bid: c.f64()?,
                ask: c.f64()?,
                bid_size: c.f64()?,
                ask_size: c.f64()?,
            },
            EventKind::Trade => Payload::Trade {
                price: c.f64()?,
                qty: c.f64()?,
                is_buy: c.u8()? != 0,
            },
            EventKind::Depth => Payload::Depth {
                bid_depth: c.f64()?,
                ask_depth: c.f64()?,
            },
            EventKind::Liquidation => Payload::Liquidation {
                price: c.f64()?,
                qty: c.f64()?,
                notional: c.f64()?,
                is_long: c.u8()? != 0,
            },
            EventKind::Cascade => Payload::Cascade {
                side: c.u8()?,
                fired: c.u8()? != 0,
                confirmation_count: c.u8()?,
                confirm_mask: c.u8()?,
            },
            EventKind::Risk => {
                let allow = c.u8()? != 0;
                let final_size = c.f64()?;
                let requested_size = c.f64()?;
                let mut mults = [0.0; 8];
                for m in &mut mults {
                    *m = c.f64()?;
                }
                Payload::Risk {
                    allow,
                    final_size,
                    requested_size,
                    mults,
                }
            }
            EventKind::OrderIntent => Payload::OrderIntent {
                is_buy: c.u8()? != 0,
                price: c.f64()?,
                qty: c.f64()?,
                utc_hour: c.u8()?,
            },
            EventKind::VenueAck => Payload::VenueAck {
                accepted: c.u8()? != 0,
                venue_code: c.u32()?,
            },
            EventKind::Fill => Payload::Fill {
                price: c.f64()?,
                qty: c.f64()?,
                is_buy: c.u8()? != 0,
            },
            EventKind::Attribution => Payload::Attribution {
                pnl: c.f64()?,
                fee: c.f64()?,
                slippage: c.f64()?,
                hold_sec: c.f64()?,
            },
            EventKind::Divergence => Payload::Divergence {
                shadow_bps: c.f64()?,
                live_bps: c.f64()?,
                paused: c.u8()? != 0,
            },
        };

        let event = Self {
            header: EventHeader {
                event_id,
                parent_id,
                kind,
                ts_ns,
                symbol_hash,
            },
            payload,
        };
        Ok((event, c.pos))
    }

    /// One JSON line mirroring the binary record, for humans.
    pub fn to_json_line(&self) -> String {
        let h = &self.header;
        let prefix = format!(
            "{{\"id\":{},\"parent\":{},\"kind\":{},\"ts_ns\":{},\"symbol\":{}",
            h.event_id, h.parent_id, h.kind as u8, h.ts_ns, h.symbol_hash
        );

        let body = match &self.payload {
            Payload::SessionStart {
                wall_anchor_ms,
                mode,
            } => format!(",\"wall_anchor_ms\":{wall_anchor_ms},\"mode\":{mode}"),
            Payload::Tick {
                bid,
                ask,
                bid_size,
                ask_size,
            } => format!(
                ",\"bid\":{bid:.8},\"ask\":{ask:.8},\"bid_size\":{bid_size:.8},\"ask_size\":{ask_size:.8}"
            ),
            Payload::Trade { price, qty, is_buy } => {
                format!(",\"price\":{price:.8},\"qty\":{qty:.8},\"is_buy\":{is_buy}")
            }
            Payload::Depth {
                bid_depth,
                ask_depth,
            } => format!(",\"bid_depth\":{bid_depth:.8},\"ask_depth\":{ask_depth:.8}"),
            Payload::Liquidation {
                price,
                qty,
                notional,
                is_long,
            } => format!(
                ",\"price\":{price:.8},\"qty\":{qty:.8},\"notional\":{notional:.2},\"is_long\":{is_long}"
            ),
            Payload::Cascade {
                side,
                fired,
                confirmation_count,
                confirm_mask,
            } => format!(
                ",\"side\":{side},\"fired\":{fired},\"confirmations\":{confirmation_count},\"mask\":{confirm_mask}"
            ),
            Payload::Risk {
                allow,
                final_size,
                requested_size,
                mults,
            } => format!(
                ",\"allow\":{allow},\"final_size\":{final_size:.8},\"requested\":{requested_size:.8},\"mults\":[{}]",
                mults
                    .iter()
                    .map(|m| format!("{m:.6}"))
                    .collect::<Vec<_>>()
                    .join(",")
            ),
            Payload::OrderIntent {
                is_buy,
                price,
                qty,
                utc_hour,
            } => format!(
                ",\"is_buy\":{is_buy},\"price\":{price:.8},\"qty\":{qty:.8},\"utc_hour\":{utc_hour}"
            ),
            Payload::VenueAck {
                accepted,
                venue_code,
            } => format!(",\"accepted\":{accepted},\"venue_code\":{venue_code}"),
            Payload::Fill { price, qty, is_buy } => {
                format!(",\"price\":{price:.8},\"qty\":{qty:.8},\"is_buy\":{is_buy}")
            }
            Payload::Attribution {
                pnl,
                fee,
                slippage,
                hold_sec,
            } => format!(
                ",\"pnl\":{pnl:.8},\"fee\":{fee:.8},\"slippage\":{slippage:.8},\"hold_sec\":{hold_sec:.2}"
            ),
            Payload::Divergence {
                shadow_bps,
                live_bps,
                paused,
            } => format!(
                ",\"shadow_bps\":{shadow_bps:.6},\"live_bps\":{live_bps:.6},\"paused\":{paused}"
            ),
        };

        format!("{prefix}{body}}}")
    }
}
