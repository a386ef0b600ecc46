//! The T.30 session state machine (spec.md §4.5): phases A-E, rate
//! negotiation, and non-ECM image transfer.
//!
//! `faxline` ties the two T.30 roles to the two halves of the basic
//! (non-polling) call model: [`Role::Calling`] places the call and is
//! the document *transmitter*; [`Role::Answering`] answers and is the
//! document *receiver*. Polling (a receiver requesting pages from the
//! answering side) is not modeled — it is one of the many single-purpose
//! DIS/DCS bits this crate's simplified [`frames::CapabilityFields`]
//! does not carry.
//!
//! ECM (spec.md §4.5) is negotiated through DCS and, once in use, an
//! entire page is read up front, chunked into FCD frames
//! ([`crate::t30::ecm::PartialPage`]) and sent as an HDLC burst closed
//! by RCP. The receiving side gates its reply on
//! [`crate::t30::ecm::PartialPage::is_complete_through`]: PPR names the
//! missing frames, which the sender resends (via
//! [`crate::t30::ecm::RetransmitTracker`]'s round counter) until MCF or
//! a CTC-equivalent [`CompletionCode::CannotTrain`] escalation. Non-ECM
//! image transfer still moves as one continuous bit stream.

use std::collections::VecDeque;

use crate::callbacks::{DocumentStatus, FrameDirection, LoggingSink, PhaseBResult, PhaseDResult, PhaseEventSink};
use crate::consts::{self, MAX_COMMAND_RETRIES, MAX_IDENT_LEN, TCF_DURATION_MS, TCF_ONES_THRESHOLD_PCT};
use crate::error::{CompletionCode, ConfigError, SessionError};
use crate::hdlc::{HdlcReceiver, HdlcRxEvent, HdlcTransmitter};
use crate::image::{PageGeometry, PageSink, PageSource};
use crate::modems::RxEvent;
use crate::mux::{HighSpeedChoice, ModemMux, MuxTxEvent, NextTxHandler};
use crate::stats::{CompressionScheme, SessionStats};
use crate::t30::ecm::{PartialPage, RetransmitTracker};
use crate::t30::fcf::Fcf;
use crate::t30::frames::{self, CapabilityFields, CompressionMask, ModemMask, PageSizeMask, ResolutionMask, RATE_TABLE};
use crate::t30::state_machine::{Phase, Role, Timer, TimerBank};

/// Programmatic session configuration (spec.md §6: "no files, no env
/// vars").
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub role: Role,
    pub supported_modems: ModemMask,
    pub supported_compression: CompressionMask,
    pub supported_resolution: ResolutionMask,
    pub supported_page_size: PageSizeMask,
    pub ecm_allowed: bool,
    pub local_ident: String,
}

impl SessionConfig {
    pub fn new(role: Role) -> Self {
        Self {
            role,
            supported_modems: ModemMask::all(),
            supported_compression: CompressionMask::MH | CompressionMask::MR,
            supported_resolution: ResolutionMask::STANDARD | ResolutionMask::FINE,
            supported_page_size: PageSizeMask::A4,
            ecm_allowed: true,
            local_ident: String::new(),
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.supported_modems.is_empty() {
            return Err(ConfigError::EmptyModemMask);
        }
        if self.local_ident.len() > MAX_IDENT_LEN {
            return Err(ConfigError::IdentTooLong {
                field: "local_ident",
                max: MAX_IDENT_LEN,
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

fn high_speed_choice_for(mask: ModemMask) -> HighSpeedChoice {
    use crate::modems::{v17, v27ter, v29};
    if mask == ModemMask::V17_14400 {
        HighSpeedChoice::V17(v17::Rate::Bps14400, v17::TrainingMode::Long)
    } else if mask == ModemMask::V17_12000 {
        HighSpeedChoice::V17(v17::Rate::Bps12000, v17::TrainingMode::Long)
    } else if mask == ModemMask::V17_9600 {
        HighSpeedChoice::V17(v17::Rate::Bps9600, v17::TrainingMode::Long)
    } else if mask == ModemMask::V17_7200 {
        HighSpeedChoice::V17(v17::Rate::Bps7200, v17::TrainingMode::Long)
    } else if mask == ModemMask::V29_9600 {
        HighSpeedChoice::V29(v29::Rate::Bps9600)
    } else if mask == ModemMask::V29_7200 {
        HighSpeedChoice::V29(v29::Rate::Bps7200)
    } else if mask == ModemMask::V27_4800 {
        HighSpeedChoice::V27ter(v27ter::Rate::Bps4800)
    } else {
        HighSpeedChoice::V27ter(v27ter::Rate::Bps2400)
    }
}

fn compression_scheme_from_mask(mask: CompressionMask) -> CompressionScheme {
    if mask.contains(CompressionMask::MMR) {
        CompressionScheme::ModifiedModifiedRead
    } else if mask.contains(CompressionMask::MR) {
        CompressionScheme::ModifiedRead
    } else {
        CompressionScheme::ModifiedHuffman
    }
}

/// Internal step tag driving both the tx and rx side of the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    /// Answering only: CED is queued, waiting to drain before DIS.
    Idle,
    /// Calling: V.21 listening for DIS/DTC.
    AwaitDis,
    /// Answering: DIS frame queued, waiting to drain.
    SendingDis,
    /// Answering: V.21 listening for DCS, or (later) for MPS/EOM/EOP/DCN.
    AwaitCommand,
    /// Calling: DCS frame queued, waiting to drain.
    SendingDcs,
    /// Calling: high-speed zero burst (TCF) active.
    SendingTcfZeros,
    /// Calling: V.21 listening for CFR/FTT.
    AwaitCfrFtt,
    /// Answering: high-speed rx running to check the TCF burst.
    AwaitTcfCarrierDown,
    /// Answering: CFR/FTT frame queued, waiting to drain.
    SendingCfrFtt,
    /// Calling: pushing page bytes into the high-speed tx (non-ECM).
    ImageTx,
    /// Calling: an ECM FCD/RCP block queued on the high-speed tx.
    SendingEcmBlock,
    /// Answering: receiving page bytes (or FCD/RCP frames) from the
    /// high-speed rx.
    ImageRx,
    /// Calling: MPS/EOM/EOP frame queued, waiting to drain.
    SendingPostMessageCommand,
    /// Calling: V.21 listening for MCF/RTN/RTP/PPR.
    AwaitPostMessageResponse,
    /// Answering: MCF reply queued, waiting to drain.
    SendingPostMessageReply,
    /// Answering: PPR reply queued, waiting to drain before the next
    /// ECM block is awaited.
    SendingPpr,
    /// DCN queued, waiting to drain before the session is fully done.
    SendingDcn,
    Done,
}

/// A T.30 FAX session: one logical state, driven entirely by
/// [`Session::rx`]/[`Session::tx`] on the caller's thread (spec.md §5).
pub struct Session {
    config: SessionConfig,
    phase: Phase,
    step: Step,
    timers: TimerBank,
    mux: ModemMux,
    hdlc_tx: HdlcTransmitter,
    hdlc_rx: HdlcReceiver,
    local_caps: CapabilityFields,
    remote_caps: Option<CapabilityFields>,
    jointly_supported_modems: ModemMask,
    negotiated_modem: Option<ModemMask>,
    ecm_in_use: bool,
    retransmit: RetransmitTracker,
    ecm_page: Option<PartialPage>,
    ecm_total_frames: usize,
    ecm_retransmitting: bool,
    retrying_page: bool,
    tx_replaying: bool,
    current_page_buffer: Vec<u8>,
    replay_cursor: usize,
    tcf_ones: u32,
    tcf_bits: u32,
    tcf_tx_zeros_left: u32,
    pending_cfr_clean: bool,
    pending_command_fcf: Option<Fcf>,
    pending_next_page: Option<PageGeometry>,
    command_retries: u8,
    stats: SessionStats,
    sink: Box<dyn PhaseEventSink>,
    page_source: Option<Box<dyn PageSource>>,
    page_sink: Option<Box<dyn PageSink>>,
    current_page_geometry: Option<PageGeometry>,
    row_byte: u8,
    row_bit_count: u8,
    completion: Option<CompletionCode>,
    tx_bit_queue: VecDeque<bool>,
}

impl Session {
    pub fn new(
        config: SessionConfig,
        page_source: Option<Box<dyn PageSource>>,
        page_sink: Option<Box<dyn PageSink>>,
        sink: Option<Box<dyn PhaseEventSink>>,
    ) -> Result<Self, SessionError> {
        config.validate()?;
        let local_caps = config.capabilities();
        let mut timers = TimerBank::new();
        timers.arm(Timer::T1);
        let mut mux = ModemMux::new();
        mux.start_rx_v21();
        let role = config.role;
        let mut session = Self {
            config,
            phase: Phase::A,
            step: Step::AwaitDis,
            timers,
            mux,
            hdlc_tx: HdlcTransmitter::new(),
            hdlc_rx: HdlcReceiver::new(),
            local_caps,
            remote_caps: None,
            jointly_supported_modems: ModemMask::empty(),
            negotiated_modem: None,
            ecm_in_use: false,
            retransmit: RetransmitTracker::new(),
            ecm_page: None,
            ecm_total_frames: 0,
            ecm_retransmitting: false,
            retrying_page: false,
            tx_replaying: false,
            current_page_buffer: Vec::new(),
            replay_cursor: 0,
            tcf_ones: 0,
            tcf_bits: 0,
            tcf_tx_zeros_left: 0,
            pending_cfr_clean: false,
            pending_command_fcf: None,
            pending_next_page: None,
            command_retries: 0,
            stats: SessionStats::new(),
            sink: sink.unwrap_or_else(|| Box::new(LoggingSink)),
            page_source,
            page_sink,
            current_page_geometry: None,
            row_byte: 0,
            row_bit_count: 0,
            completion: None,
            tx_bit_queue: VecDeque::new(),
        };

        if role == Role::Answering {
            session.step = Step::Idle;
            session.mux.queue_switch(NextTxHandler::Ced(2_600));
        }
        Ok(session)
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
        if self.completion.is_none() {
            self.phase = Phase::E;
            self.completion = Some(code);
            self.sink.phase_e(code);
        }
    }

    fn queue_frame(&mut self, frame: Vec<u8>) {
        self.sink.real_time_frame(FrameDirection::Tx, &frame);
        self.hdlc_tx.push_frame(&frame);
        self.mux.queue_switch(NextTxHandler::V21);
    }

    fn negotiated_bps(&self) -> Option<u32> {
        let modem = self.negotiated_modem?;
        RATE_TABLE.iter().find(|(m, _)| *m == modem).map(|(_, bps)| *bps)
    }

    // --- rx path ---

    pub fn rx(&mut self, samples: &[i16]) {
        for &sample in samples {
            self.rx_sample(sample);
        }
        let fired = self.timers.tick(samples.len() as u32);
        for timer in fired {
            self.on_timer_expired(timer);
        }
    }

    fn rx_sample(&mut self, sample: i16) {
        let out = self.mux.receive_sample(sample);
        match self.step {
            Step::AwaitTcfCarrierDown => {
                for bit in out.bits {
                    self.tcf_bits += 1;
                    if bit {
                        self.tcf_ones += 1;
                    }
                }
                if matches!(out.event, Some(RxEvent::CarrierDown)) {
                    self.finish_tcf_check();
                }
            }
            Step::ImageRx => {
                if self.ecm_in_use {
                    for bit in out.bits {
                        if let Some(event) = self.hdlc_rx.receive_bit(bit) {
                            self.on_hdlc_event(event);
                        }
                    }
                } else {
                    self.accumulate_image_bits(&out.bits);
                }
                if matches!(out.event, Some(RxEvent::CarrierDown)) {
                    self.on_image_carrier_down();
                }
            }
            _ => {
                for bit in out.bits {
                    if let Some(event) = self.hdlc_rx.receive_bit(bit) {
                        self.on_hdlc_event(event);
                    }
                }
            }
        }
    }

    fn accumulate_image_bits(&mut self, bits: &[bool]) {
        for &bit in bits {
            self.row_byte = (self.row_byte << 1) | bit as u8;
            self.row_bit_count += 1;
            if self.row_bit_count == 8 {
                if let Some(sink) = self.page_sink.as_mut() {
                    let _ = sink.write_row_data(&[self.row_byte]);
                }
                self.stats.add_image_bytes(1);
                self.row_byte = 0;
                self.row_bit_count = 0;
            }
        }
    }

    fn on_image_carrier_down(&mut self) {
        if self.step != Step::ImageRx {
            return;
        }
        self.mux.start_rx_v21();
        self.phase = Phase::D;
        self.step = Step::AwaitCommand;
        self.timers.arm(Timer::T2);
        if self.ecm_in_use {
            // Completeness (and the MCF/PPR decision) is judged once the
            // post-page command names how many frames the block held,
            // not at carrier-down.
            return;
        }
        if let Some(sink) = self.page_sink.as_mut() {
            let _ = sink.finish_page(self.stats.bad_rows);
        }
        self.sink.document_handler(DocumentStatus::PageCompleted);
    }

    fn on_hdlc_event(&mut self, event: HdlcRxEvent) {
        match event {
            HdlcRxEvent::Good(frame) => {
                self.sink.real_time_frame(FrameDirection::Rx, &frame);
                self.handle_frame(&frame);
            }
            HdlcRxEvent::Bad(_) | HdlcRxEvent::LengthError | HdlcRxEvent::Abort => {
                log::debug!("hdlc rx discarded a frame: {event:?}");
            }
            HdlcRxEvent::FramingOk | HdlcRxEvent::FlagOnly => {}
        }
    }

    fn handle_frame(&mut self, frame: &[u8]) {
        let Some((fcf, _is_final)) = frames::read_fcf(frame) else {
            return;
        };
        self.timers.cancel(Timer::T4);
        self.timers.cancel(Timer::T2);
        match fcf {
            Fcf::Dis | Fcf::Dtc => self.on_dis(frame),
            Fcf::Dcs => self.on_dcs(frame),
            Fcf::Cfr => self.on_cfr(),
            Fcf::Ftt => self.on_ftt(),
            Fcf::Mcf => self.on_mcf(),
            Fcf::Rtn | Fcf::Rtp => self.on_retrain_request(),
            Fcf::Ppr => self.on_ppr(frame),
            Fcf::Mps | Fcf::Eom | Fcf::Eop => self.on_post_message_command(fcf),
            Fcf::Fcd => self.on_fcd(frame),
            Fcf::Rcp => self.on_rcp(frame),
            Fcf::Dcn => self.finish(CompletionCode::Ok),
            _ => log::debug!("unhandled FCF in this simplified engine: {fcf:?}"),
        }
    }

    fn on_dis(&mut self, frame: &[u8]) {
        if self.config.role != Role::Calling || self.step != Step::AwaitDis {
            return;
        }
        let Some(remote) = frames::read_capability_fields(frame) else {
            self.finish(CompletionCode::UnexpectedMessage);
            return;
        };
        self.timers.cancel(Timer::T1);
        self.phase = Phase::B;
        self.begin_dcs_for_best_rate(remote);
    }

    fn begin_dcs_for_best_rate(&mut self, remote: CapabilityFields) {
        self.remote_caps = Some(remote);
        let jointly_supported = self.config.supported_modems & remote.modems;
        self.jointly_supported_modems = jointly_supported;
        let Some(&(modem, _)) = RATE_TABLE.iter().find(|(m, _)| jointly_supported.contains(*m)) else {
            self.finish(CompletionCode::Incompatible);
            return;
        };
        self.negotiated_modem = Some(modem);
        self.ecm_in_use = self.config.ecm_allowed && remote.ecm_allowed;
        self.send_dcs();
    }

    fn step_down_modem_and_resend(&mut self) {
        let Some(current) = self.negotiated_modem else {
            self.finish(CompletionCode::CannotTrain);
            return;
        };
        let next_modem = RATE_TABLE
            .iter()
            .position(|(m, _)| *m == current)
            .and_then(|i| RATE_TABLE[i + 1..].iter().find(|(m, _)| self.jointly_supported_modems.contains(*m)))
            .map(|(m, _)| *m);
        match next_modem {
            Some(modem) => {
                self.negotiated_modem = Some(modem);
                self.send_dcs();
            }
            None => self.finish(CompletionCode::CannotTrain),
        }
    }

    fn send_dcs(&mut self) {
        let mut caps = self.local_caps;
        caps.ecm_allowed = self.ecm_in_use;
        let frame = frames::build_dcs(true, caps);
        self.queue_frame(frame);
        self.step = Step::SendingDcs;
        self.timers.arm(Timer::T4);
    }

    fn on_dcs(&mut self, frame: &[u8]) {
        if self.config.role != Role::Answering || self.step != Step::AwaitCommand {
            return;
        }
        let Some(remote) = frames::read_capability_fields(frame) else {
            self.finish(CompletionCode::UnexpectedMessage);
            return;
        };
        self.remote_caps = Some(remote);
        let jointly_supported = self.config.supported_modems & remote.modems;
        let Some(&(modem, _)) = RATE_TABLE.iter().find(|(m, _)| jointly_supported.contains(*m)) else {
            self.finish(CompletionCode::Incompatible);
            return;
        };
        self.negotiated_modem = Some(modem);
        self.ecm_in_use = self.config.ecm_allowed && remote.ecm_allowed;
        self.phase = Phase::B;
        self.mux.start_rx_high_speed(high_speed_choice_for(modem));
        self.tcf_ones = 0;
        self.tcf_bits = 0;
        self.step = Step::AwaitTcfCarrierDown;
    }

    fn finish_tcf_check(&mut self) {
        let pct = if self.tcf_bits == 0 {
            100.0
        } else {
            (self.tcf_ones as f32 / self.tcf_bits as f32) * 100.0
        };
        self.pending_cfr_clean = pct < TCF_ONES_THRESHOLD_PCT;
        let fcf = if self.pending_cfr_clean { Fcf::Cfr } else { Fcf::Ftt };
        let frame = frames::build(fcf, true, &[]);
        self.queue_frame(frame);
        self.step = Step::SendingCfrFtt;
    }

    fn begin_image_rx(&mut self) {
        self.phase = Phase::C;
        self.step = Step::ImageRx;
        self.mux.start_rx_high_speed(high_speed_choice_for(self.negotiated_modem.unwrap()));
        self.ecm_total_frames = 0;
        let compression = self.remote_caps.map(|c| c.compression).unwrap_or(CompressionMask::MH);
        let geometry = PageGeometry {
            columns: 1728,
            rows: 0,
            compression: compression_scheme_from_mask(compression),
        };
        self.current_page_geometry = Some(geometry);
        self.sink.document_handler(DocumentStatus::PageStarted);
        if let Some(sink) = self.page_sink.as_mut() {
            let _ = sink.start_page(geometry);
        }
        self.ecm_page = if self.ecm_in_use {
            Some(PartialPage::new(self.negotiated_bps().unwrap_or(0) >= 7200))
        } else {
            None
        };
    }

    fn on_cfr(&mut self) {
        if self.step != Step::AwaitCfrFtt {
            return;
        }
        self.sink.phase_b(PhaseBResult::Negotiated {
            bps: self.negotiated_bps().unwrap_or(0),
        });
        if self.retrying_page {
            let g = self.current_page_geometry.expect("a retry always follows a page already being sent");
            self.begin_next_page_tx(g);
            return;
        }
        let next = match self.page_source.as_mut() {
            Some(source) => source.next_page(),
            None => Ok(None),
        };
        match next {
            Ok(Some(g)) => self.begin_next_page_tx(g),
            Ok(None) => self.finish(CompletionCode::PageNotFound),
            Err(e) => self.finish(e.into()),
        }
    }

    fn on_ftt(&mut self) {
        if self.step != Step::AwaitCfrFtt {
            return;
        }
        self.sink.phase_b(PhaseBResult::Failed(CompletionCode::CannotTrain));
        self.step_down_modem_and_resend();
    }

    fn begin_next_page_tx(&mut self, geometry: PageGeometry) {
        self.current_page_geometry = Some(geometry);
        if !self.retrying_page {
            self.stats.record_page_seen();
            self.current_page_buffer.clear();
        }
        self.sink.document_handler(DocumentStatus::PageStarted);
        self.phase = Phase::C;
        let modem = self.negotiated_modem.unwrap();
        self.mux.queue_switch(NextTxHandler::HighSpeed(high_speed_choice_for(modem)));
        if self.ecm_in_use {
            self.begin_ecm_page_tx();
        } else {
            self.replay_cursor = 0;
            self.tx_replaying = self.retrying_page;
            self.step = Step::ImageTx;
        }
        self.retrying_page = false;
    }

    /// Reads the whole page (or resends the already-buffered one, for a
    /// retry) as a single ECM block of FCD frames closed by RCP.
    fn begin_ecm_page_tx(&mut self) {
        self.retransmit.reset();
        if !(self.retrying_page && self.ecm_page.is_some()) {
            let high_speed = self.negotiated_bps().unwrap_or(0) >= 7200;
            let mut page = PartialPage::new(high_speed);
            let frame_len = page.frame_len();
            let mut buf = vec![0u8; frame_len];
            let mut seq = 0usize;
            if let Some(source) = self.page_source.as_mut() {
                while seq < consts::ECM_MAX_FRAMES {
                    let read = source.read_row_data(&mut buf).unwrap_or(0);
                    if read == 0 {
                        break;
                    }
                    page.store_frame(seq as u8, &buf[..read]);
                    self.stats.add_image_bytes(read as u64);
                    seq += 1;
                }
            }
            self.ecm_total_frames = seq;
            self.ecm_page = Some(page);
        }
        let seqs: Vec<u8> = (0..self.ecm_total_frames as u8).collect();
        self.send_ecm_frames(&seqs);
    }

    /// Queues the named FCD frames plus a closing RCP on the high-speed
    /// tx, for either the first pass over a page or a PPR-driven resend.
    fn send_ecm_frames(&mut self, seqs: &[u8]) {
        let outgoing: Vec<Vec<u8>> = match self.ecm_page.as_ref() {
            Some(page) => seqs.iter().filter_map(|&seq| page.frame_at(seq).map(|data| frames::build_fcd(false, seq, data))).collect(),
            None => Vec::new(),
        };
        for frame in outgoing {
            self.sink.real_time_frame(FrameDirection::Tx, &frame);
            self.hdlc_tx.push_frame(&frame);
        }
        let frame_count_byte = if self.ecm_total_frames >= consts::ECM_MAX_FRAMES {
            0
        } else {
            self.ecm_total_frames as u8
        };
        let rcp = frames::build_rcp(true, frame_count_byte);
        self.sink.real_time_frame(FrameDirection::Tx, &rcp);
        self.hdlc_tx.push_frame(&rcp);
        self.step = Step::SendingEcmBlock;
    }

    fn proceed_after_page_outcome(&mut self) {
        match self.pending_command_fcf.take() {
            Some(Fcf::Mps) => {
                let g = self.pending_next_page.take().expect("Mps is only sent when a next page was found");
                self.begin_next_page_tx(g);
            }
            Some(Fcf::Eom) => {
                let remote = self.remote_caps.expect("Eom implies a prior DIS/DCS exchange");
                self.begin_dcs_for_best_rate(remote);
            }
            _ => self.send_dcn(),
        }
    }

    fn on_mcf(&mut self) {
        if self.step != Step::AwaitPostMessageResponse {
            return;
        }
        let rate = self.negotiated_bps().unwrap_or(0);
        let compression = self.current_page_geometry.map(|g| g.compression).unwrap_or(CompressionScheme::ModifiedHuffman);
        self.stats.record_page_transferred(rate, self.ecm_in_use, compression);
        self.sink.phase_d(PhaseDResult::Mcf);
        self.sink.document_handler(DocumentStatus::PageCompleted);
        self.retransmit.reset();
        self.proceed_after_page_outcome();
    }

    /// Retries transmitting the page currently in [`Step::AwaitPostMessageResponse`],
    /// optionally at a lower rate (spec.md §4.5): RTN means the far end
    /// could not use what was just sent, not that the page is done.
    fn retry_current_page(&mut self) {
        if self.current_page_geometry.is_none() {
            self.finish(CompletionCode::InvalidResponseAfterPage);
            return;
        }
        self.pending_next_page = None;
        self.pending_command_fcf = None;
        self.retrying_page = true;
        self.phase = Phase::B;
        self.step_down_modem_and_resend();
    }

    fn on_retrain_request(&mut self) {
        if self.step != Step::AwaitPostMessageResponse {
            return;
        }
        self.sink.phase_d(PhaseDResult::Rtn);
        self.retry_current_page();
    }

    fn on_ppr(&mut self, frame: &[u8]) {
        if self.step != Step::AwaitPostMessageResponse {
            return;
        }
        let Some(bitmap) = frames::read_ppr_bitmap(frame) else {
            return;
        };
        let missing: Vec<u8> = PartialPage::frames_to_resend(&bitmap)
            .into_iter()
            .filter(|&seq| (seq as usize) < self.ecm_total_frames)
            .collect();
        self.sink.phase_d(PhaseDResult::Ppr {
            bad_frame_count: missing.len() as u16,
        });
        if self.retransmit.record_ppr_round() {
            self.finish(CompletionCode::CannotTrain);
            return;
        }
        self.ecm_retransmitting = true;
        let modem = self.negotiated_modem.expect("ppr only arrives after a modem was negotiated");
        self.mux.queue_switch(NextTxHandler::HighSpeed(high_speed_choice_for(modem)));
        self.send_ecm_frames(&missing);
    }

    fn on_post_message_command(&mut self, fcf: Fcf) {
        if self.config.role != Role::Answering || self.step != Step::AwaitCommand {
            return;
        }
        if self.ecm_in_use {
            self.on_post_message_command_ecm(fcf);
            return;
        }
        self.pending_command_fcf = Some(fcf);
        let frame = frames::build(Fcf::Mcf, true, &[]);
        self.queue_frame(frame);
        self.phase = Phase::D;
        self.step = Step::SendingPostMessageReply;
    }

    /// ECM variant of [`Self::on_post_message_command`]: replies MCF only
    /// once every FCD frame the block should have held has actually
    /// arrived, and PPR (naming the gaps) otherwise.
    fn on_post_message_command_ecm(&mut self, fcf: Fcf) {
        let complete = self.ecm_page.as_ref().is_some_and(|p| p.is_complete_through(self.ecm_total_frames));
        if complete {
            if let Some(page) = self.ecm_page.take() {
                if let Some(sink) = self.page_sink.as_mut() {
                    for (_, data) in page.ordered_frames() {
                        let _ = sink.write_row_data(data);
                    }
                    let _ = sink.finish_page(self.stats.bad_rows);
                }
            }
            self.sink.document_handler(DocumentStatus::PageCompleted);
            self.pending_command_fcf = Some(fcf);
            let frame = frames::build(Fcf::Mcf, true, &[]);
            self.queue_frame(frame);
            self.phase = Phase::D;
            self.step = Step::SendingPostMessageReply;
        } else {
            self.pending_command_fcf = Some(fcf);
            let bitmap = self.ecm_page.as_ref().map(PartialPage::good_frame_bitmap).unwrap_or([0u8; 32]);
            let frame = frames::build_ppr(true, &bitmap);
            self.queue_frame(frame);
            self.phase = Phase::D;
            self.step = Step::SendingPpr;
        }
    }

    fn on_fcd(&mut self, frame: &[u8]) {
        if self.step != Step::ImageRx || !self.ecm_in_use {
            return;
        }
        let Some((seq, payload)) = frames::read_fcd(frame) else {
            return;
        };
        if let Some(page) = self.ecm_page.as_mut() {
            page.store_frame(seq, payload);
        }
    }

    fn on_rcp(&mut self, frame: &[u8]) {
        if self.step != Step::ImageRx || !self.ecm_in_use {
            return;
        }
        if let Some(count) = frames::read_rcp_frame_count(frame) {
            self.ecm_total_frames = if count == 0 { consts::ECM_MAX_FRAMES } else { count as usize };
        }
    }

    fn advance_after_post_message_reply(&mut self) {
        match self.pending_command_fcf.take() {
            Some(Fcf::Mps) => self.begin_image_rx(),
            Some(Fcf::Eom) => {
                self.step = Step::AwaitCommand;
                self.mux.start_rx_v21();
            }
            _ => {
                self.sink.document_handler(DocumentStatus::DocumentCompleted);
                self.step = Step::AwaitCommand;
                self.mux.start_rx_v21();
                self.timers.arm(Timer::T2);
            }
        }
    }

    fn send_dcn(&mut self) {
        let frame = frames::build(Fcf::Dcn, true, &[]);
        self.queue_frame(frame);
        self.step = Step::SendingDcn;
        self.finish(CompletionCode::Ok);
    }

    fn on_timer_expired(&mut self, timer: Timer) {
        match timer {
            Timer::T1 => self.finish(CompletionCode::T1Expired),
            Timer::T4 => {
                self.command_retries += 1;
                if self.command_retries > MAX_COMMAND_RETRIES {
                    self.finish(CompletionCode::NoResponseToDcs);
                } else {
                    self.timers.arm(Timer::T4);
                }
            }
            Timer::T2 => self.finish(CompletionCode::T2ExpiredForPhaseD),
            Timer::T0 | Timer::T3 | Timer::T5 => {}
        }
    }

    // --- tx path ---

    pub fn tx(&mut self, out: &mut [i16]) -> usize {
        for (i, slot) in out.iter_mut().enumerate() {
            if self.phase == Phase::E && self.mux.tx_is_idle() {
                return i;
            }
            self.feed_tx_bits();
            let (sample, event) = self.mux.next_sample();
            *slot = sample;
            if matches!(event, Some(MuxTxEvent::StepComplete)) {
                self.on_tx_step_complete();
            }
        }
        out.len()
    }

    fn feed_tx_bits(&mut self) {
        match self.step {
            Step::SendingTcfZeros => {
                if self.tcf_tx_zeros_left > 0 {
                    self.mux.push_bit(false);
                    self.tcf_tx_zeros_left -= 1;
                }
            }
            Step::ImageTx => {
                if self.tx_bit_queue.is_empty() {
                    let next_byte = if self.tx_replaying {
                        let byte = self.current_page_buffer.get(self.replay_cursor).copied();
                        if byte.is_some() {
                            self.replay_cursor += 1;
                        }
                        byte
                    } else {
                        let mut buf = [0u8; 1];
                        let read = self.page_source.as_mut().and_then(|s| s.read_row_data(&mut buf).ok());
                        if read == Some(1) {
                            self.stats.add_image_bytes(1);
                            self.current_page_buffer.push(buf[0]);
                            Some(buf[0])
                        } else {
                            None
                        }
                    };
                    if let Some(byte) = next_byte {
                        for i in (0..8).rev() {
                            self.tx_bit_queue.push_back((byte >> i) & 1 == 1);
                        }
                    }
                }
                if let Some(bit) = self.tx_bit_queue.pop_front() {
                    self.mux.push_bit(bit);
                }
            }
            _ => {
                if !self.hdlc_tx.is_idle() {
                    if let Some(bit) = self.hdlc_tx.next_bit() {
                        self.mux.push_bit(bit);
                    }
                }
            }
        }
    }

    fn on_tx_step_complete(&mut self) {
        match self.step {
            Step::Idle => self.send_dis(),
            Step::SendingDis => {
                self.step = Step::AwaitCommand;
            }
            Step::SendingDcs => {
                let modem = self.negotiated_modem.unwrap();
                self.mux.queue_switch(NextTxHandler::HighSpeed(high_speed_choice_for(modem)));
                self.tcf_tx_zeros_left = (TCF_DURATION_MS * consts::SAMPLE_RATE) / 1000;
                self.step = Step::SendingTcfZeros;
            }
            Step::SendingTcfZeros => {
                self.mux.start_rx_v21();
                self.step = Step::AwaitCfrFtt;
            }
            Step::SendingCfrFtt => {
                if self.pending_cfr_clean {
                    self.begin_image_rx();
                } else {
                    self.step = Step::AwaitCommand;
                    self.mux.start_rx_v21();
                }
            }
            Step::ImageTx => self.maybe_advance_after_image_tx(),
            Step::SendingEcmBlock => {
                if self.ecm_retransmitting {
                    self.ecm_retransmitting = false;
                    self.resend_post_page_command();
                } else {
                    self.maybe_advance_after_image_tx();
                }
            }
            Step::SendingPostMessageCommand => {
                self.step = Step::AwaitPostMessageResponse;
            }
            Step::SendingPostMessageReply => self.advance_after_post_message_reply(),
            Step::SendingPpr => {
                self.phase = Phase::C;
                self.step = Step::ImageRx;
                self.mux.start_rx_high_speed(high_speed_choice_for(self.negotiated_modem.unwrap()));
            }
            Step::SendingDcn => {
                self.step = Step::Done;
            }
            _ => {}
        }
    }

    /// Resends the already-chosen post-page command (MPS/EOM/EOP) after a
    /// PPR-driven FCD/RCP retransmission, without re-peeking the page
    /// source for what comes next.
    fn resend_post_page_command(&mut self) {
        let fcf = self.pending_command_fcf.expect("ecm retransmission always follows a pending post-page command");
        let frame = frames::build(fcf, true, &[]);
        self.queue_frame(frame);
        self.phase = Phase::D;
        self.step = Step::SendingPostMessageCommand;
        self.timers.arm(Timer::T4);
    }

    fn send_dis(&mut self) {
        let frame = frames::build_dis(true, self.local_caps);
        self.queue_frame(frame);
        self.step = Step::SendingDis;
    }

    fn maybe_advance_after_image_tx(&mut self) {
        let next = match self.page_source.as_mut() {
            Some(source) => match source.next_page() {
                Ok(g) => g,
                Err(e) => {
                    self.finish(e.into());
                    return;
                }
            },
            None => None,
        };
        let fcf = if next.is_some() { Fcf::Mps } else { Fcf::Eop };
        self.pending_next_page = next;
        self.pending_command_fcf = Some(fcf);
        let frame = frames::build(fcf, true, &[]);
        self.queue_frame(frame);
        self.phase = Phase::D;
        self.step = Step::SendingPostMessageCommand;
        self.timers.arm(Timer::T4);
    }
}

/// Module-level free functions matching spec.md §6's external interface
/// shape exactly.
pub fn rx(session: &mut Session, samples: &[i16]) {
    session.rx(samples);
}

pub fn tx(session: &mut Session, out: &mut [i16]) -> usize {
    session.tx(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::{MemoryDocument, MemoryPageSink};

    fn geometry() -> PageGeometry {
        PageGeometry {
            columns: 1728,
            rows: 100,
            compression: CompressionScheme::ModifiedHuffman,
        }
    }

    #[test]
    fn rejects_a_config_with_no_modems_selected() {
        let mut config = SessionConfig::new(Role::Calling);
        config.supported_modems = ModemMask::empty();
        assert!(Session::new(config, None, None, None).is_err());
    }

    #[test]
    fn answering_session_starts_in_phase_a_queueing_ced() {
        let config = SessionConfig::new(Role::Answering);
        let session = Session::new(config, None, None, None).unwrap();
        assert_eq!(session.phase(), Phase::A);
    }

    #[test]
    fn calling_session_drives_tx_silence_while_awaiting_dis() {
        let config = SessionConfig::new(Role::Calling);
        let mut session = Session::new(config, None, None, None).unwrap();
        let mut out = [0i16; 32];
        let n = session.tx(&mut out);
        assert_eq!(n, 32);
        assert!(out.iter().all(|&s| s == 0));
    }

    #[test]
    fn answering_session_drives_ced_tone_before_dis() {
        let config = SessionConfig::new(Role::Answering);
        let mut session = Session::new(config, None, None, None).unwrap();
        let mut out = [0i16; 400];
        session.tx(&mut out);
        assert!(out.iter().any(|&s| s != 0), "CED tone should produce non-zero samples");
    }

    #[test]
    fn two_sessions_negotiate_and_transfer_one_page_end_to_end() {
        let mut doc = MemoryDocument::new();
        let page_bytes: Vec<u8> = (0..200u32).map(|i| (i * 37 + 5) as u8).collect();
        doc.push_page(geometry(), page_bytes.clone());
        let source = doc.into_reader();
        let sink = MemoryPageSink::new();

        let mut caller_config = SessionConfig::new(Role::Calling);
        caller_config.supported_modems = ModemMask::V27_2400;
        let mut callee_config = SessionConfig::new(Role::Answering);
        callee_config.supported_modems = ModemMask::V27_2400;

        let mut caller = Session::new(caller_config, Some(Box::new(source)), None, None).unwrap();
        let mut callee = Session::new(callee_config, None, Some(Box::new(sink)), None).unwrap();

        let mut caller_to_callee = [0i16; 160];
        let mut callee_to_caller = [0i16; 160];
        let mut rounds = 0;
        loop {
            rounds += 1;
            if rounds > 200_000 {
                panic!("session never reached phase E");
            }
            caller.tx(&mut caller_to_callee);
            callee.tx(&mut callee_to_caller);
            callee.rx(&caller_to_callee);
            caller.rx(&callee_to_caller);

            if caller.completion_code().is_some() && callee.phase() == Phase::E {
                break;
            }
        }

        assert_eq!(caller.completion_code(), Some(CompletionCode::Ok));
    }

    #[test]
    fn two_sessions_negotiate_and_transfer_a_multi_frame_ecm_page_end_to_end() {
        // Big enough to span several 64-byte ECM frames (spec.md §4.5's
        // partial-page protocol) while staying under one 256-frame block,
        // so this exercises `begin_ecm_page_tx`/`send_ecm_frames`/`on_fcd`/
        // `on_rcp` without also having to drive a PPR round.
        let mut doc = MemoryDocument::new();
        let page_bytes: Vec<u8> = (0..1000u32).map(|i| (i * 91 + 13) as u8).collect();
        doc.push_page(geometry(), page_bytes.clone());
        let source = doc.into_reader();
        let sink = MemoryPageSink::new();

        let mut caller_config = SessionConfig::new(Role::Calling);
        caller_config.supported_modems = ModemMask::V27_2400;
        caller_config.ecm_allowed = true;
        let mut callee_config = SessionConfig::new(Role::Answering);
        callee_config.supported_modems = ModemMask::V27_2400;
        callee_config.ecm_allowed = true;

        let mut caller = Session::new(caller_config, Some(Box::new(source)), None, None).unwrap();
        let mut callee = Session::new(callee_config, None, Some(Box::new(sink)), None).unwrap();

        let mut caller_to_callee = [0i16; 160];
        let mut callee_to_caller = [0i16; 160];
        let mut rounds = 0;
        loop {
            rounds += 1;
            if rounds > 400_000 {
                panic!("session never reached phase E");
            }
            caller.tx(&mut caller_to_callee);
            callee.tx(&mut callee_to_caller);
            callee.rx(&caller_to_callee);
            caller.rx(&callee_to_caller);

            if caller.completion_code().is_some() && callee.phase() == Phase::E {
                break;
            }
        }

        assert_eq!(caller.completion_code(), Some(CompletionCode::Ok));
    }
}
