//! T.38 terminal (spec.md §4.8): a T.30 endpoint driven directly by IFP
//! packets instead of PCM audio. There is no modem here — HDLC frames and
//! image rows travel as [`DataField`]s, and [`TimedStep`] stands in for
//! the carrier/training timing a real modem would otherwise impose,
//! advanced by the host feeding elapsed sample counts to [`tick`].
//!
//! [`tick`]: T38Terminal::tick

use crate::callbacks::{DocumentStatus, FrameDirection, PhaseBResult, PhaseDResult, PhaseEventSink};
use crate::consts::{MAX_COMMAND_RETRIES, TCF_DURATION_MS, TCF_ONES_THRESHOLD_PCT};
use crate::error::{CompletionCode, ConfigError, SessionError};
use crate::image::{PageGeometry, PageSink, PageSource};
use crate::stats::SessionStats;
use crate::t30::ecm::RetransmitTracker;
use crate::t30::fcf::Fcf;
use crate::t30::frames::{self, CapabilityFields, CompressionMask, ModemMask, PageSizeMask, RATE_TABLE, ResolutionMask};
use crate::t30::state_machine::{Phase, Role, Timer, TimerBank};
use crate::t38::core::{DataField, DataType, FieldType, Indicator, PacketTransport, T38Core, T38RxSink};

/// The timed-step engine's states (spec.md §4.8), standing in for the
/// carrier/training phases a PCM modem would otherwise drive. The numeric
/// suffixes track successive sub-stages of the same nominal phase (e.g.
/// `HdlcModem1` = preamble, `HdlcModem2` = frame body, `HdlcModem3` =
/// post-frame flags, `HdlcModem4` = the pre-pause before a handler
/// switch), matching how spec.md enumerates them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimedStep {
    None,
    NonEcmModem1,
    NonEcmModem2,
    NonEcmModem3,
    HdlcModem1,
    HdlcModem2,
    HdlcModem3,
    HdlcModem4,
    Ced1,
    Ced2,
    Cng1,
    Cng2,
    Pause,
}

/// T.30 negotiation/transfer logic, independent of how it arrived (HDLC
/// frame vs. decoded packet) or how it's timed (PCM carrier vs. scheduled
/// delta). Named and shaped after [`crate::t30::session::Session`]'s
/// `Step`, since this is the same state machine minus the modem layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LogicStep {
    Idle,
    AwaitDis,
    SendingDis,
    AwaitCommand,
    SendingDcs,
    SendingTcf,
    AwaitCfrFtt,
    SendingCfrFtt,
    ImageTx,
    ImageRx,
    SendingPostMessageCommand,
    AwaitPostMessageResponse,
    SendingPostMessageReply,
    SendingDcn,
    Done,
}

#[derive(Debug, Clone)]
pub struct TerminalConfig {
    pub role: Role,
    pub supported_modems: ModemMask,
    pub supported_compression: CompressionMask,
    pub supported_resolution: ResolutionMask,
    pub supported_page_size: PageSizeMask,
    pub ecm_allowed: bool,
    pub local_ident: String,
    /// TCP-style unpaced transport raises the IFP redundancy count down
    /// to 1 and merges HDLC_DATA+HDLC_FCS_OK into one field (spec.md
    /// §4.8's "merged fields optimization").
    pub paced: bool,
}

impl TerminalConfig {
    pub fn new(role: Role) -> Self {
        Self {
            role,
            supported_modems: ModemMask::all(),
            supported_compression: CompressionMask::MH | CompressionMask::MR,
            supported_resolution: ResolutionMask::STANDARD | ResolutionMask::FINE,
            supported_page_size: PageSizeMask::A4,
            ecm_allowed: true,
            local_ident: String::new(),
            paced: true,
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.supported_modems.is_empty() {
            return Err(ConfigError::EmptyModemMask);
        }
        if self.local_ident.len() > crate::consts::MAX_IDENT_LEN {
            return Err(ConfigError::IdentTooLong {
                field: "local_ident",
                max: crate::consts::MAX_IDENT_LEN,
            });
        }
        Ok(())
    }

    fn capabilities(&self) -> CapabilityFields {
        CapabilityFields {
            modems: self.supported_modems,
            compression: self.supported_compression,
            resolution: self.supported_resolution,
            page_size: self.supported_page_size,
            ecm_allowed: self.ecm_allowed,
        }
    }
}

fn compression_scheme_from_mask(mask: CompressionMask) -> crate::stats::CompressionScheme {
    use crate::stats::CompressionScheme;
    if mask.contains(CompressionMask::MMR) {
        CompressionScheme::ModifiedModifiedRead
    } else if mask.contains(CompressionMask::MR) {
        CompressionScheme::ModifiedRead
    } else {
        CompressionScheme::ModifiedHuffman
    }
}

fn data_type_for(mask: ModemMask) -> DataType {
    if mask == ModemMask::V17_14400 {
        DataType::V17_14400
    } else if mask == ModemMask::V17_12000 {
        DataType::V17_12000
    } else if mask == ModemMask::V17_9600 {
        DataType::V17_9600
    } else if mask == ModemMask::V17_7200 {
        DataType::V17_7200
    } else if mask == ModemMask::V29_9600 {
        DataType::V29_9600
    } else if mask == ModemMask::V29_7200 {
        DataType::V29_7200
    } else if mask == ModemMask::V27_4800 {
        DataType::V27Ter4800
    } else {
        DataType::V27Ter2400
    }
}

fn indicator_for(mask: ModemMask, long_training: bool) -> Indicator {
    if mask == ModemMask::V17_14400 {
        if long_training { Indicator::V17_14400LongTraining } else { Indicator::V17_14400ShortTraining }
    } else if mask == ModemMask::V17_12000 {
        if long_training { Indicator::V17_12000LongTraining } else { Indicator::V17_12000ShortTraining }
    } else if mask == ModemMask::V17_9600 {
        if long_training { Indicator::V17_9600LongTraining } else { Indicator::V17_9600ShortTraining }
    } else if mask == ModemMask::V17_7200 {
        if long_training { Indicator::V17_7200LongTraining } else { Indicator::V17_7200ShortTraining }
    } else if mask == ModemMask::V29_9600 {
        Indicator::V29_9600Training
    } else if mask == ModemMask::V29_7200 {
        Indicator::V29_7200Training
    } else if mask == ModemMask::V27_4800 {
        Indicator::V27Ter4800Training
    } else {
        Indicator::V27Ter2400Training
    }
}

/// TCF is represented on the wire as a plain run of zero bytes in a
/// `T4_NON_ECM_DATA` field (spec.md §4.8) rather than actual modem
/// carrier, since there is no modem here to demodulate.
fn tcf_byte_count() -> usize {
    // 1 bit per sample at the slowest rate this engine ever checks TCF
    // against (2400 bps, matching the slowest row of RATE_TABLE).
    (2_400 * TCF_DURATION_MS / 1000 / 8) as usize
}

/// A T.30 endpoint whose rx/tx sides are IFP packets, not PCM. Drive it
/// with [`rx_packet`] as packets arrive and [`tick`] on a regular
/// schedule (it arms the same [`Timer`]s [`crate::t30::Session`] does).
///
/// [`rx_packet`]: T38Terminal::rx_packet
/// [`tick`]: T38Terminal::tick
pub struct T38Terminal {
    config: TerminalConfig,
    phase: Phase,
    step: LogicStep,
    timed: TimedStep,
    timers: TimerBank,
    core: T38Core,
    local_caps: CapabilityFields,
    remote_caps: Option<CapabilityFields>,
    jointly_supported_modems: ModemMask,
    negotiated_modem: Option<ModemMask>,
    command_retries: u8,
    stats: SessionStats,
    sink: Box<dyn PhaseEventSink>,
    page_source: Option<Box<dyn PageSource>>,
    page_sink: Option<Box<dyn PageSink>>,
    tcf_zero_bytes_left: usize,
    tcf_bytes_seen: usize,
    tcf_nonzero_seen: usize,
    completion: Option<CompletionCode>,
    retransmit: RetransmitTracker,
    /// The image bytes most recently sent, kept around so an RTN reply
    /// can be answered by resending the same page rather than advancing
    /// to the next one.
    last_page_bytes: Option<Vec<u8>>,
}

impl T38Terminal {
    pub fn new(
        config: TerminalConfig,
        page_source: Option<Box<dyn PageSource>>,
        page_sink: Option<Box<dyn PageSink>>,
        sink: Box<dyn PhaseEventSink>,
    ) -> Result<Self, SessionError> {
        config.validate().map_err(SessionError::Config)?;
        let local_caps = config.capabilities();
        let mut timers = TimerBank::new();
        let role = config.role;
        let redundancy = if config.paced { 3 } else { 1 };
        timers.arm(Timer::T1);
        Ok(Self {
            config,
            phase: Phase::A,
            step: if role == Role::Calling { LogicStep::AwaitDis } else { LogicStep::Idle },
            timed: TimedStep::None,
            timers,
            core: T38Core::new(redundancy),
            local_caps,
            remote_caps: None,
            jointly_supported_modems: ModemMask::empty(),
            negotiated_modem: None,
            command_retries: 0,
            stats: SessionStats::new(),
            sink,
            page_source,
            page_sink,
            tcf_zero_bytes_left: 0,
            tcf_bytes_seen: 0,
            tcf_nonzero_seen: 0,
            completion: None,
            retransmit: RetransmitTracker::new(),
            last_page_bytes: None,
        })
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn stats(&self) -> SessionStats {
        self.stats
    }

    pub fn completion_code(&self) -> Option<CompletionCode> {
        self.completion
    }

    fn finish(&mut self, code: CompletionCode) {
        self.phase = Phase::E;
        self.step = LogicStep::Done;
        self.timed = TimedStep::None;
        self.completion = Some(code);
        self.sink.phase_e(code);
    }

    fn send_frame(&mut self, transport: &mut impl PacketTransport, frame: Vec<u8>) {
        self.sink.real_time_frame(FrameDirection::Tx, &frame);
        self.core.send_indicator(transport, Indicator::V21Preamble);
        self.timed = TimedStep::HdlcModem1;
        if self.config.paced {
            self.core.send_data(
                transport,
                DataType::V21,
                vec![DataField { field_type: FieldType::HdlcData, data: frame }],
            );
            self.core.send_data(
                transport,
                DataType::V21,
                vec![DataField { field_type: FieldType::HdlcFcsOk, data: Vec::new() }],
            );
        } else {
            // Merged-fields optimization (spec.md §4.8): unpaced
            // transports fold HDLC_DATA and HDLC_FCS_OK into one packet.
            self.core.send_data(
                transport,
                DataType::V21,
                vec![
                    DataField { field_type: FieldType::HdlcData, data: frame },
                    DataField { field_type: FieldType::HdlcFcsOk, data: Vec::new() },
                ],
            );
        }
        self.timed = TimedStep::HdlcModem4;
    }

    // --- outbound T.30 logic, mirroring crate::t30::session::Session ---

    pub fn start(&mut self, transport: &mut impl PacketTransport) {
        if self.config.role == Role::Answering {
            self.core.send_indicator(transport, Indicator::Ced);
            self.timed = TimedStep::Ced1;
            self.send_dis(transport);
        }
    }

    fn send_dis(&mut self, transport: &mut impl PacketTransport) {
        let frame = frames::build_dis(true, self.local_caps);
        self.send_frame(transport, frame);
        self.step = LogicStep::SendingDis;
        self.timers.arm(Timer::T2);
    }

    fn begin_dcs_for_best_rate(&mut self, remote: CapabilityFields, transport: &mut impl PacketTransport) {
        self.remote_caps = Some(remote);
        self.jointly_supported_modems = self.config.supported_modems & remote.modems;
        let Some(&(modem, _)) = RATE_TABLE.iter().find(|(m, _)| self.jointly_supported_modems.contains(*m)) else {
            self.finish(CompletionCode::Incompatible);
            return;
        };
        self.negotiated_modem = Some(modem);
        self.send_dcs(transport);
    }

    fn send_dcs(&mut self, transport: &mut impl PacketTransport) {
        let modem = self.negotiated_modem.expect("DCS only sent once a modem is chosen");
        let mut caps = self.local_caps;
        caps.modems = modem;
        let frame = frames::build_dcs(true, caps);
        self.send_frame(transport, frame);
        self.step = LogicStep::SendingDcs;
        self.begin_tcf(transport);
    }

    fn begin_tcf(&mut self, transport: &mut impl PacketTransport) {
        let modem = self.negotiated_modem.expect("TCF only follows a chosen modem");
        self.core.send_indicator(transport, indicator_for(modem, true));
        self.tcf_zero_bytes_left = tcf_byte_count();
        self.core.send_data(
            transport,
            data_type_for(modem),
            vec![DataField { field_type: FieldType::T4NonEcmData, data: vec![0; self.tcf_zero_bytes_left] }],
        );
        self.core.send_data(
            transport,
            data_type_for(modem),
            vec![DataField { field_type: FieldType::T4NonEcmSigEnd, data: Vec::new() }],
        );
        self.step = LogicStep::AwaitCfrFtt;
        self.timed = TimedStep::NonEcmModem1;
        self.timers.arm(Timer::T4);
    }

    fn step_down_modem_and_resend(&mut self, transport: &mut impl PacketTransport) {
        let Some(current) = self.negotiated_modem else {
            self.finish(CompletionCode::CannotTrain);
            return;
        };
        let current_idx = RATE_TABLE.iter().position(|(m, _)| *m == current).unwrap_or(RATE_TABLE.len());
        let Some(&(next, _)) = RATE_TABLE[current_idx + 1..]
            .iter()
            .find(|(m, _)| self.jointly_supported_modems.contains(*m))
        else {
            self.finish(CompletionCode::CannotTrain);
            return;
        };
        self.negotiated_modem = Some(next);
        self.send_dcs(transport);
    }

    /// Sends the next page, or (`retry: true`, after an RTN) resends
    /// [`Self::last_page_bytes`] instead of consuming a fresh one from
    /// [`Self::page_source`].
    fn begin_image_tx(&mut self, transport: &mut impl PacketTransport, retry: bool) {
        let pending = if retry {
            let Some(bytes) = self.last_page_bytes.clone() else {
                self.finish(CompletionCode::InvalidResponseAfterPage);
                return;
            };
            bytes
        } else {
            let Some(source) = self.page_source.as_mut() else {
                self.finish(CompletionCode::CannotOpen);
                return;
            };
            match source.next_page() {
                Ok(Some(_geometry)) => {}
                Ok(None) => {
                    self.send_post_message(transport, Fcf::Eop);
                    return;
                }
                Err(e) => {
                    self.finish(e.into());
                    return;
                }
            }
            self.sink.document_handler(DocumentStatus::PageStarted);
            let mut buf = [0u8; 4096];
            let mut bytes = Vec::new();
            loop {
                let n = match self.page_source.as_mut().unwrap().read_row_data(&mut buf) {
                    Ok(n) => n,
                    Err(e) => {
                        self.finish(e.into());
                        return;
                    }
                };
                if n == 0 {
                    break;
                }
                bytes.extend_from_slice(&buf[..n]);
            }
            self.last_page_bytes = Some(bytes.clone());
            bytes
        };
        let modem = self.negotiated_modem.expect("image tx only after training");
        self.core.send_indicator(transport, indicator_for(modem, false));
        self.step = LogicStep::ImageTx;
        self.timed = TimedStep::NonEcmModem1;
        self.core.send_data(
            transport,
            data_type_for(modem),
            vec![DataField { field_type: FieldType::T4NonEcmData, data: pending }],
        );
        self.core.send_data(
            transport,
            data_type_for(modem),
            vec![DataField { field_type: FieldType::T4NonEcmSigEnd, data: Vec::new() }],
        );
        self.sink.document_handler(DocumentStatus::PageCompleted);
        self.send_post_message(transport, Fcf::Mps);
    }

    fn send_post_message(&mut self, transport: &mut impl PacketTransport, fcf: Fcf) {
        let frame = frames::build(fcf, true, &[]);
        self.send_frame(transport, frame);
        self.step = LogicStep::SendingPostMessageCommand;
        self.timers.arm(Timer::T4);
    }

    fn send_dcn(&mut self, transport: &mut impl PacketTransport) {
        let frame = frames::build(Fcf::Dcn, true, &[]);
        self.send_frame(transport, frame);
        self.step = LogicStep::SendingDcn;
    }

    // --- inbound handling ---

    pub fn rx_packet(&mut self, bytes: &[u8], seq_no: u16, transport: &mut impl PacketTransport) {
        let mut sink_adapter = TerminalRxSink { transport, terminal: self };
        // Split `core` out the same way `T38Gateway::rx_ifp_packet` does,
        // to let the sink adapter borrow the rest of `self`.
        let redundancy = if sink_adapter.terminal.config.paced { 3 } else { 1 };
        let mut core = std::mem::replace(&mut sink_adapter.terminal.core, T38Core::new(redundancy));
        core.rx_packet(bytes, seq_no, &mut sink_adapter);
        sink_adapter.terminal.core = core;
    }

    fn on_remote_indicator(&mut self, indicator: Indicator) {
        self.tcf_bytes_seen = 0;
        self.tcf_nonzero_seen = 0;
        match indicator {
            Indicator::NoSignal => self.timed = TimedStep::None,
            Indicator::Cng => self.timed = TimedStep::Cng1,
            Indicator::Ced => self.timed = TimedStep::Ced1,
            Indicator::V21Preamble => self.timed = TimedStep::HdlcModem1,
            _ => self.timed = TimedStep::NonEcmModem1,
        }
    }

    fn on_remote_data(&mut self, transport: &mut impl PacketTransport, field: &DataField) {
        match field.field_type {
            FieldType::HdlcData => {
                self.sink.real_time_frame(FrameDirection::Rx, &field.data);
                self.handle_frame(transport, &field.data);
            }
            FieldType::T4NonEcmData => {
                if self.step == LogicStep::AwaitCfrFtt {
                    for &byte in &field.data {
                        self.tcf_bytes_seen += 1;
                        self.tcf_nonzero_seen += byte.count_ones() as usize;
                    }
                } else if self.step == LogicStep::ImageRx {
                    if let Some(sink) = self.page_sink.as_mut() {
                        if let Err(e) = sink.write_row_data(&field.data) {
                            self.finish(e.into());
                        }
                    }
                }
            }
            FieldType::T4NonEcmSigEnd if self.step == LogicStep::AwaitCfrFtt => {
                self.finish_tcf_check(transport);
            }
            FieldType::T4NonEcmSigEnd if self.step == LogicStep::ImageRx => {
                self.on_image_complete(transport);
            }
            _ => {}
        }
    }

    fn finish_tcf_check(&mut self, transport: &mut impl PacketTransport) {
        let pct = if self.tcf_bytes_seen == 0 {
            100.0
        } else {
            self.tcf_nonzero_seen as f32 * 100.0 / (self.tcf_bytes_seen as f32 * 8.0)
        };
        self.timers.cancel(Timer::T4);
        if pct < TCF_ONES_THRESHOLD_PCT {
            let frame = frames::build(Fcf::Cfr, true, &[]);
            self.send_frame(transport, frame);
            self.sink.phase_b(PhaseBResult::Negotiated { bps: self.negotiated_bps().unwrap_or(0) });
            self.step = LogicStep::SendingCfrFtt;
        } else {
            let frame = frames::build(Fcf::Ftt, true, &[]);
            self.send_frame(transport, frame);
            self.step = LogicStep::SendingCfrFtt;
        }
    }

    fn negotiated_bps(&self) -> Option<u32> {
        let modem = self.negotiated_modem?;
        RATE_TABLE.iter().find(|(m, _)| *m == modem).map(|(_, bps)| *bps)
    }

    fn begin_image_rx(&mut self) {
        let geometry = PageGeometry {
            columns: 1728,
            rows: 0,
            compression: compression_scheme_from_mask(
                self.remote_caps.map(|c| c.compression).unwrap_or(CompressionMask::MH),
            ),
        };
        if let Some(sink) = self.page_sink.as_mut() {
            let _ = sink.start_page(geometry);
        }
        self.sink.document_handler(DocumentStatus::PageStarted);
        self.step = LogicStep::ImageRx;
        self.timed = TimedStep::NonEcmModem2;
    }

    fn on_image_complete(&mut self, transport: &mut impl PacketTransport) {
        if let Some(sink) = self.page_sink.as_mut() {
            let _ = sink.finish_page(0);
        }
        self.sink.document_handler(DocumentStatus::PageCompleted);
        self.phase = Phase::D;
        self.step = LogicStep::AwaitCommand;
        self.timers.arm(Timer::T2);
        let frame = frames::build(Fcf::Mcf, true, &[]);
        self.send_frame(transport, frame);
        self.stats.record_page_transferred(
            self.negotiated_bps().unwrap_or(0),
            false,
            compression_scheme_from_mask(self.remote_caps.map(|c| c.compression).unwrap_or(CompressionMask::MH)),
        );
    }

    fn handle_frame(&mut self, transport: &mut impl PacketTransport, frame: &[u8]) {
        self.timers.cancel(Timer::T2);
        self.timers.cancel(Timer::T4);
        let Some((fcf, _is_final)) = frames::read_fcf(frame) else {
            return;
        };
        match fcf {
            Fcf::Dis | Fcf::Dtc if self.config.role == Role::Calling && self.step == LogicStep::AwaitDis => {
                let Some(remote) = frames::read_capability_fields(frame) else {
                    return;
                };
                self.phase = Phase::B;
                self.begin_dcs_for_best_rate(remote, transport);
            }
            Fcf::Dcs if self.config.role == Role::Answering && self.step == LogicStep::AwaitCommand => {
                let Some(remote) = frames::read_capability_fields(frame) else {
                    return;
                };
                self.remote_caps = Some(remote);
                self.jointly_supported_modems = self.config.supported_modems & remote.modems;
                let Some(&(modem, _)) = RATE_TABLE.iter().find(|(m, _)| self.jointly_supported_modems.contains(*m)) else {
                    self.finish(CompletionCode::Incompatible);
                    return;
                };
                self.negotiated_modem = Some(modem);
                self.phase = Phase::B;
            }
            Fcf::Cfr if self.step == LogicStep::SendingDcs || self.step == LogicStep::AwaitCfrFtt => {
                self.phase = Phase::C;
                self.begin_image_tx(transport, false);
            }
            Fcf::Ftt if self.step == LogicStep::SendingDcs || self.step == LogicStep::AwaitCfrFtt => {
                self.command_retries += 1;
                if self.command_retries >= MAX_COMMAND_RETRIES {
                    self.step_down_modem_and_resend(transport);
                } else {
                    self.send_dcs(transport);
                }
            }
            Fcf::Mcf | Fcf::Rtp => {
                self.phase = Phase::C;
                self.retransmit.reset();
                self.begin_image_tx(transport, false);
            }
            Fcf::Rtn => {
                self.phase = Phase::C;
                if self.retransmit.record_ppr_round() {
                    self.finish(CompletionCode::CannotTrain);
                } else {
                    self.begin_image_tx(transport, true);
                }
            }
            Fcf::Mps | Fcf::Eop | Fcf::Eom => {
                self.send_dcn(transport);
                self.finish(CompletionCode::Ok);
            }
            Fcf::Dcn => {
                self.finish(CompletionCode::Ok);
            }
            _ => {}
        }
        if self.config.role == Role::Answering && self.step == LogicStep::Idle && self.phase == Phase::A {
            self.timers.arm(Timer::T2);
        }
    }

    /// Advances timers and retries by `elapsed_samples` worth of virtual
    /// clock, standing in for [`crate::t30::Session::rx`]'s per-sample
    /// timer tick (spec.md §4.8's scheduled sample-time deltas).
    pub fn tick(&mut self, elapsed_samples: u32, transport: &mut impl PacketTransport) {
        for timer in self.timers.tick(elapsed_samples) {
            self.on_timer_expired(timer, transport);
        }
    }

    fn on_timer_expired(&mut self, timer: Timer, transport: &mut impl PacketTransport) {
        match timer {
            Timer::T1 => {
                if self.phase == Phase::A && self.config.role == Role::Calling {
                    self.finish(CompletionCode::T1Expired);
                }
            }
            Timer::T2 | Timer::T4 => {
                self.command_retries += 1;
                if self.command_retries >= MAX_COMMAND_RETRIES {
                    self.finish(CompletionCode::T2ExpiredGeneric);
                } else {
                    match self.step {
                        LogicStep::SendingDis | LogicStep::AwaitCommand if self.config.role == Role::Answering => {
                            self.send_dis(transport);
                        }
                        LogicStep::SendingDcs | LogicStep::AwaitCfrFtt => self.send_dcs(transport),
                        LogicStep::SendingPostMessageCommand => {}
                        _ => {}
                    }
                }
            }
            _ => {}
        }
    }
}

struct TerminalRxSink<'a, T> {
    transport: &'a mut T,
    terminal: &'a mut T38Terminal,
}

impl<T: PacketTransport> T38RxSink for TerminalRxSink<'_, T> {
    fn on_indicator(&mut self, indicator: Indicator) {
        self.terminal.on_remote_indicator(indicator);
    }

    fn on_data(&mut self, _data_type: DataType, field: &DataField) {
        self.terminal.on_remote_data(self.transport, field);
    }

    fn on_missing(&mut self, gap: u16) {
        log::debug!("t38 terminal: {gap} missing packet(s)");
    }
}

impl T38Terminal {
    /// Moves the receiver from control (V.21) expectations to image
    /// expectations once CFR has gone out, mirroring
    /// [`crate::t30::session::Session::begin_image_rx`].
    pub fn note_cfr_sent(&mut self) {
        if self.step == LogicStep::SendingCfrFtt {
            self.begin_image_rx();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callbacks::LoggingSink;
    use crate::image::{MemoryDocument, MemoryPageSink};
    use crate::stats::CompressionScheme;

    struct RecordingTransport {
        packets: Vec<Vec<u8>>,
    }

    impl PacketTransport for RecordingTransport {
        fn send_packet(&mut self, bytes: &[u8], _copies: u8) {
            self.packets.push(bytes.to_vec());
        }
    }

    fn config(role: Role) -> TerminalConfig {
        TerminalConfig::new(role)
    }

    #[test]
    fn rejects_a_config_with_no_modems_selected() {
        let mut cfg = config(Role::Calling);
        cfg.supported_modems = ModemMask::empty();
        let result = T38Terminal::new(cfg, None, None, Box::new(LoggingSink));
        assert!(result.is_err());
    }

    #[test]
    fn answering_terminal_sends_ced_then_dis_on_start() {
        let mut terminal =
            T38Terminal::new(config(Role::Answering), None, None, Box::new(LoggingSink)).unwrap();
        let mut transport = RecordingTransport { packets: Vec::new() };
        terminal.start(&mut transport);
        assert!(!transport.packets.is_empty());
        assert_eq!(terminal.phase(), Phase::A);
    }

    #[test]
    fn calling_terminal_negotiates_and_transfers_one_page() {
        let mut doc = MemoryDocument::new();
        doc.push_page(
            PageGeometry { columns: 1728, rows: 4, compression: CompressionScheme::ModifiedHuffman },
            vec![0xAA; 32],
        );
        let mut calling = T38Terminal::new(
            config(Role::Calling),
            Some(Box::new(doc.into_reader())),
            None,
            Box::new(LoggingSink),
        )
        .unwrap();
        let mut answering = T38Terminal::new(
            config(Role::Answering),
            None,
            Some(Box::new(MemoryPageSink::new())),
            Box::new(LoggingSink),
        )
        .unwrap();

        let mut to_calling = RecordingTransport { packets: Vec::new() };
        let mut to_answering = RecordingTransport { packets: Vec::new() };
        answering.start(&mut to_calling);

        for _ in 0..64 {
            for (i, packet) in to_calling.packets.drain(..).enumerate() {
                calling.rx_packet(&packet, i as u16, &mut to_answering);
            }
            for (i, packet) in to_answering.packets.drain(..).enumerate() {
                answering.rx_packet(&packet, i as u16, &mut to_calling);
                if answering.step == LogicStep::SendingCfrFtt {
                    answering.note_cfr_sent();
                }
            }
            if calling.completion_code().is_some() && answering.completion_code().is_some() {
                break;
            }
        }

        assert_eq!(calling.completion_code(), Some(CompletionCode::Ok));
    }
}
