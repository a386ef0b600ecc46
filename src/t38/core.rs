//! T.38 IFP packet core (spec.md §4.6): packet encode/decode, indicator and
//! data-field dispatch, and sequence-number gap handling.
//!
//! The real T.38 Recommendation encodes IFP packets with a T.35 ASN.1 PER
//! scheme meant to interoperate with arbitrary vendors' gateways. `faxline`
//! is not chasing wire interop with other implementations (spec.md never
//! asks for it — see [`crate::t30::frames`]'s DIS/DCS note for the same
//! reasoning) so [`encode`]/[`decode`] here use a small tagged binary layout
//! instead of reproducing the ASN.1 packer; the indicator/field/data-type
//! enumerations themselves are reproduced verbatim from spec.md §6.

/// T.38 indicator values (spec.md §6). V.8/V.34/V.33 indicators are out of
/// scope (this crate's modem set stops at V.17) and are not represented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum Indicator {
    NoSignal,
    Cng,
    Ced,
    V21Preamble,
    V27Ter2400Training,
    V27Ter4800Training,
    V29_7200Training,
    V29_9600Training,
    V17_7200ShortTraining,
    V17_7200LongTraining,
    V17_9600ShortTraining,
    V17_9600LongTraining,
    V17_12000ShortTraining,
    V17_12000LongTraining,
    V17_14400ShortTraining,
    V17_14400LongTraining,
}

impl Indicator {
    fn to_byte(self) -> u8 {
        match self {
            Indicator::NoSignal => 0,
            Indicator::Cng => 1,
            Indicator::Ced => 2,
            Indicator::V21Preamble => 3,
            Indicator::V27Ter2400Training => 4,
            Indicator::V27Ter4800Training => 5,
            Indicator::V29_7200Training => 6,
            Indicator::V29_9600Training => 7,
            Indicator::V17_7200ShortTraining => 8,
            Indicator::V17_7200LongTraining => 9,
            Indicator::V17_9600ShortTraining => 10,
            Indicator::V17_9600LongTraining => 11,
            Indicator::V17_12000ShortTraining => 12,
            Indicator::V17_12000LongTraining => 13,
            Indicator::V17_14400ShortTraining => 14,
            Indicator::V17_14400LongTraining => 15,
        }
    }

    fn from_byte(byte: u8) -> Option<Self> {
        Some(match byte {
            0 => Indicator::NoSignal,
            1 => Indicator::Cng,
            2 => Indicator::Ced,
            3 => Indicator::V21Preamble,
            4 => Indicator::V27Ter2400Training,
            5 => Indicator::V27Ter4800Training,
            6 => Indicator::V29_7200Training,
            7 => Indicator::V29_9600Training,
            8 => Indicator::V17_7200ShortTraining,
            9 => Indicator::V17_7200LongTraining,
            10 => Indicator::V17_9600ShortTraining,
            11 => Indicator::V17_9600LongTraining,
            12 => Indicator::V17_12000ShortTraining,
            13 => Indicator::V17_12000LongTraining,
            14 => Indicator::V17_14400ShortTraining,
            15 => Indicator::V17_14400LongTraining,
            _ => return None,
        })
    }
}

/// Data-packet field types (spec.md §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum FieldType {
    HdlcData,
    HdlcFcsOk,
    HdlcFcsBad,
    HdlcFcsOkSigEnd,
    HdlcFcsBadSigEnd,
    HdlcSigEnd,
    T4NonEcmData,
    T4NonEcmSigEnd,
    CmMessage,
    JmMessage,
    CiMessage,
    V34Rate,
}

impl FieldType {
    fn to_byte(self) -> u8 {
        match self {
            FieldType::HdlcData => 0,
            FieldType::HdlcFcsOk => 1,
            FieldType::HdlcFcsBad => 2,
            FieldType::HdlcFcsOkSigEnd => 3,
            FieldType::HdlcFcsBadSigEnd => 4,
            FieldType::HdlcSigEnd => 5,
            FieldType::T4NonEcmData => 6,
            FieldType::T4NonEcmSigEnd => 7,
            FieldType::CmMessage => 8,
            FieldType::JmMessage => 9,
            FieldType::CiMessage => 10,
            FieldType::V34Rate => 11,
        }
    }

    fn from_byte(byte: u8) -> Option<Self> {
        Some(match byte {
            0 => FieldType::HdlcData,
            1 => FieldType::HdlcFcsOk,
            2 => FieldType::HdlcFcsBad,
            3 => FieldType::HdlcFcsOkSigEnd,
            4 => FieldType::HdlcFcsBadSigEnd,
            5 => FieldType::HdlcSigEnd,
            6 => FieldType::T4NonEcmData,
            7 => FieldType::T4NonEcmSigEnd,
            8 => FieldType::CmMessage,
            9 => FieldType::JmMessage,
            10 => FieldType::CiMessage,
            11 => FieldType::V34Rate,
            _ => return None,
        })
    }

    /// Whether this field type is a carrier-state marker rather than page
    /// content. Some senders re-announce these across several IFP packets
    /// with incrementing sequence numbers as the real carrier drops; those
    /// repeats are the genuine duplicates spec.md §4.6 describes. Data
    /// fields (`HdlcData`, `T4NonEcmData`, ...) carry fresh payload bytes
    /// every time and must never be suppressed this way.
    fn is_repeatable_marker(self) -> bool {
        matches!(
            self,
            FieldType::HdlcFcsOk | FieldType::HdlcFcsBad | FieldType::HdlcFcsOkSigEnd | FieldType::HdlcFcsBadSigEnd | FieldType::HdlcSigEnd | FieldType::T4NonEcmSigEnd
        )
    }
}

/// Data-type tags: which modem the enclosed field(s) belong to (spec.md §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum DataType {
    V21,
    V27Ter2400,
    V27Ter4800,
    V29_7200,
    V29_9600,
    V17_7200,
    V17_9600,
    V17_12000,
    V17_14400,
}

impl DataType {
    fn to_byte(self) -> u8 {
        match self {
            DataType::V21 => 0,
            DataType::V27Ter2400 => 1,
            DataType::V27Ter4800 => 2,
            DataType::V29_7200 => 3,
            DataType::V29_9600 => 4,
            DataType::V17_7200 => 5,
            DataType::V17_9600 => 6,
            DataType::V17_12000 => 7,
            DataType::V17_14400 => 8,
        }
    }

    fn from_byte(byte: u8) -> Option<Self> {
        Some(match byte {
            0 => DataType::V21,
            1 => DataType::V27Ter2400,
            2 => DataType::V27Ter4800,
            3 => DataType::V29_7200,
            4 => DataType::V29_9600,
            5 => DataType::V17_7200,
            6 => DataType::V17_9600,
            7 => DataType::V17_12000,
            8 => DataType::V17_14400,
            _ => return None,
        })
    }
}

/// One field carried by a T.38 data packet: a field type plus payload bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataField {
    pub field_type: FieldType,
    pub data: Vec<u8>,
}

/// One IFP packet: either an indicator or one-or-more data fields for a
/// given data type, tagged with the transport sequence number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IfpPacket {
    Indicator { seq: u16, indicator: Indicator },
    Data { seq: u16, data_type: DataType, fields: Vec<DataField> },
}

fn encode(packet: &IfpPacket) -> Vec<u8> {
    let mut out = Vec::new();
    match packet {
        IfpPacket::Indicator { seq, indicator } => {
            out.push(0);
            out.extend_from_slice(&seq.to_be_bytes());
            out.push(indicator.to_byte());
        }
        IfpPacket::Data { seq, data_type, fields } => {
            out.push(1);
            out.extend_from_slice(&seq.to_be_bytes());
            out.push(data_type.to_byte());
            out.push(fields.len() as u8);
            for field in fields {
                out.push(field.field_type.to_byte());
                out.extend_from_slice(&(field.data.len() as u16).to_be_bytes());
                out.extend_from_slice(&field.data);
            }
        }
    }
    out
}

fn decode(bytes: &[u8]) -> Option<IfpPacket> {
    let &tag = bytes.first()?;
    let seq = u16::from_be_bytes([*bytes.get(1)?, *bytes.get(2)?]);
    match tag {
        0 => {
            let indicator = Indicator::from_byte(*bytes.get(3)?)?;
            Some(IfpPacket::Indicator { seq, indicator })
        }
        1 => {
            let data_type = DataType::from_byte(*bytes.get(3)?)?;
            let count = *bytes.get(4)? as usize;
            let mut fields = Vec::with_capacity(count);
            let mut cursor = 5usize;
            for _ in 0..count {
                let field_type = FieldType::from_byte(*bytes.get(cursor)?)?;
                let len = u16::from_be_bytes([*bytes.get(cursor + 1)?, *bytes.get(cursor + 2)?]) as usize;
                let start = cursor + 3;
                let data = bytes.get(start..start + len)?.to_vec();
                fields.push(DataField { field_type, data });
                cursor = start + len;
            }
            Some(IfpPacket::Data { seq, data_type, fields })
        }
        _ => None,
    }
}

/// Callbacks invoked as decoded packets arrive (spec.md §4.6's three rx
/// callbacks: on-indicator, on-data, on-missing).
pub trait T38RxSink {
    fn on_indicator(&mut self, _indicator: Indicator) {}
    fn on_data(&mut self, _data_type: DataType, _field: &DataField) {}
    fn on_missing(&mut self, _gap: u16) {}
}

/// Caller-supplied transport: send raw encoded bytes with a redundancy
/// count (spec.md §6's `send_packet(bytes, copies)`).
pub trait PacketTransport {
    fn send_packet(&mut self, bytes: &[u8], copies: u8);
}

/// Encodes/decodes IFP packets and tracks the tx/rx sequence numbers
/// (spec.md §4.6). Stateless with respect to fax content — it is a framing
/// layer only.
pub struct T38Core {
    tx_seq: u16,
    rx_seq: Option<u16>,
    redundancy: u8,
    last_indicator: Option<Indicator>,
    last_data: Option<(DataType, FieldType)>,
}

impl T38Core {
    /// `redundancy` is the default indicator/data copy count (3 for UDP
    /// transports, 1 for TCP, per spec.md §4.6).
    pub fn new(redundancy: u8) -> Self {
        Self {
            tx_seq: 0,
            rx_seq: None,
            redundancy,
            last_indicator: None,
            last_data: None,
        }
    }

    fn next_seq(&mut self) -> u16 {
        let seq = self.tx_seq;
        self.tx_seq = self.tx_seq.wrapping_add(1);
        seq
    }

    pub fn send_indicator(&mut self, transport: &mut impl PacketTransport, indicator: Indicator) {
        let seq = self.next_seq();
        let bytes = encode(&IfpPacket::Indicator { seq, indicator });
        log::trace!("t38 tx indicator {indicator:?} seq={seq}");
        transport.send_packet(&bytes, self.redundancy);
    }

    pub fn send_data(&mut self, transport: &mut impl PacketTransport, data_type: DataType, fields: Vec<DataField>) {
        let seq = self.next_seq();
        log::trace!("t38 tx data {data_type:?} seq={seq} fields={}", fields.len());
        let bytes = encode(&IfpPacket::Data { seq, data_type, fields });
        transport.send_packet(&bytes, self.redundancy);
    }

    /// Decodes one received packet, invoking `sink`'s callbacks. A repeated
    /// indicator, or a repeated carrier-state marker field
    /// ([`FieldType::is_repeatable_marker`]) for the same data type in
    /// immediate succession, is silently suppressed per spec.md §4.6;
    /// ordinary data fields are always forwarded, since each carries fresh
    /// payload bytes even when its field type matches the previous packet's.
    pub fn rx_packet(&mut self, bytes: &[u8], seq_no: u16, sink: &mut impl T38RxSink) {
        let Some(packet) = decode(bytes) else {
            log::debug!("t38 rx: dropped an undecodable packet");
            return;
        };
        if let Some(last) = self.rx_seq {
            let gap = seq_no.wrapping_sub(last).wrapping_sub(1);
            if gap != 0 && gap < u16::MAX / 2 {
                log::debug!("t38 rx: sequence gap of {gap}");
                sink.on_missing(gap);
            }
        }
        self.rx_seq = Some(seq_no);

        match packet {
            IfpPacket::Indicator { indicator, .. } => {
                if self.last_indicator == Some(indicator) {
                    return;
                }
                self.last_indicator = Some(indicator);
                self.last_data = None;
                sink.on_indicator(indicator);
            }
            IfpPacket::Data { data_type, fields, .. } => {
                for field in &fields {
                    let marker = field.field_type.is_repeatable_marker();
                    if marker && self.last_data == Some((data_type, field.field_type)) {
                        continue;
                    }
                    self.last_data = if marker { Some((data_type, field.field_type)) } else { None };
                    sink.on_data(data_type, field);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct RecordingTransport {
        sent: Vec<(Vec<u8>, u8)>,
    }

    impl PacketTransport for RecordingTransport {
        fn send_packet(&mut self, bytes: &[u8], copies: u8) {
            self.sent.push((bytes.to_vec(), copies));
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        indicators: Vec<Indicator>,
        data: Vec<(DataType, FieldType)>,
        missing: Vec<u16>,
    }

    impl T38RxSink for RecordingSink {
        fn on_indicator(&mut self, indicator: Indicator) {
            self.indicators.push(indicator);
        }
        fn on_data(&mut self, data_type: DataType, field: &DataField) {
            self.data.push((data_type, field.field_type));
        }
        fn on_missing(&mut self, gap: u16) {
            self.missing.push(gap);
        }
    }

    #[test]
    fn indicator_round_trips_through_encode_then_decode() {
        let mut core = T38Core::new(3);
        let mut transport = RecordingTransport { sent: Vec::new() };
        core.send_indicator(&mut transport, Indicator::V29_9600Training);
        assert_eq!(transport.sent.len(), 1);
        assert_eq!(transport.sent[0].1, 3);

        let mut rx_core = T38Core::new(3);
        let mut sink = RecordingSink::default();
        rx_core.rx_packet(&transport.sent[0].0, 0, &mut sink);
        assert_eq!(sink.indicators, vec![Indicator::V29_9600Training]);
    }

    #[test]
    fn sequence_gap_triggers_on_missing_exactly_once() {
        let mut core = T38Core::new(1);
        let mut sink = RecordingSink::default();
        let packet = encode(&IfpPacket::Indicator {
            seq: 0,
            indicator: Indicator::NoSignal,
        });
        core.rx_packet(&packet, 0, &mut sink);
        let next = encode(&IfpPacket::Indicator {
            seq: 2,
            indicator: Indicator::V21Preamble,
        });
        core.rx_packet(&next, 2, &mut sink);
        assert_eq!(sink.missing, vec![1]);
    }

    #[test]
    fn duplicate_marker_field_in_immediate_succession_is_suppressed() {
        let mut core = T38Core::new(1);
        let mut sink = RecordingSink::default();
        let field = DataField {
            field_type: FieldType::HdlcFcsOk,
            data: Vec::new(),
        };
        let packet = encode(&IfpPacket::Data {
            seq: 0,
            data_type: DataType::V21,
            fields: vec![field.clone()],
        });
        core.rx_packet(&packet, 0, &mut sink);
        let packet2 = encode(&IfpPacket::Data {
            seq: 1,
            data_type: DataType::V21,
            fields: vec![field],
        });
        core.rx_packet(&packet2, 1, &mut sink);
        assert_eq!(sink.data.len(), 1);
    }

    #[test]
    fn repeated_data_field_type_with_fresh_payload_is_never_suppressed() {
        let mut core = T38Core::new(1);
        let mut bytes_seen = Vec::new();
        struct PayloadSink<'a>(&'a mut Vec<u8>);
        impl T38RxSink for PayloadSink<'_> {
            fn on_data(&mut self, _data_type: DataType, field: &DataField) {
                self.0.extend_from_slice(&field.data);
            }
        }
        let mut payload_sink = PayloadSink(&mut bytes_seen);
        for (seq, byte) in [0xAAu8, 0xBB, 0xCC].into_iter().enumerate() {
            let field = DataField {
                field_type: FieldType::HdlcData,
                data: vec![byte],
            };
            let packet = encode(&IfpPacket::Data {
                seq: seq as u16,
                data_type: DataType::V21,
                fields: vec![field],
            });
            core.rx_packet(&packet, seq as u16, &mut payload_sink);
        }
        assert_eq!(bytes_seen, vec![0xAA, 0xBB, 0xCC]);
    }
}
