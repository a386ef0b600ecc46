//! T.38 gateway (spec.md §4.7): bridges a PCM FAX endpoint to an IFP packet
//! stream. Runs the modem set ([`crate::mux::ModemMux`]) on the PCM side and
//! [`T38Core`] on the packet side. Unlike [`crate::t30::Session`] it tracks
//! no phases — it forwards HDLC frames and non-ECM image bytes, inspecting
//! a handful of them in flight to clip capabilities or suppress vendor
//! frames.

use std::collections::VecDeque;

use crate::hdlc::{HdlcReceiver, HdlcRxEvent, HdlcTransmitter};
use crate::modems::RxEvent;
use crate::mux::{HighSpeedChoice, ModemMux, NextTxHandler};
use crate::t30::fcf::Fcf;
use crate::t30::frames::{self, CapabilityFields, ModemMask};
use crate::t38::core::{DataField, DataType, FieldType, Indicator, PacketTransport, T38Core, T38RxSink};

/// Jitter-absorbing ring for outgoing HDLC bytes: not released to the
/// modem until [`JITTER_LOW_WATERMARK`] bytes are queued (spec.md §4.7).
const JITTER_RING_CAPACITY: usize = 256 * 260;
const JITTER_LOW_WATERMARK: usize = 8;

/// Target packetisation cadence: 30 ms of data per outgoing data packet
/// (spec.md §4.7's "Packetisation cadence"), uncapped (300-byte cap) when
/// `paced` is false (TCP transport).
const PACKETISATION_MS: u32 = 30;
const UNPACED_BYTE_CAP: usize = 300;

fn bytes_per_data_packet(bps: u32, paced: bool) -> usize {
    if !paced {
        return UNPACED_BYTE_CAP;
    }
    // bits/sec * 30 ms / 1000 ms-per-sec / 8 bits-per-byte
    ((bps as u64 * PACKETISATION_MS as u64) / 8_000).max(1) as usize
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

/// Gateway configuration: the capability clip and ECM suppression spec.md
/// §4.7's "Frame editing" describes.
#[derive(Debug, Clone, Copy)]
pub struct GatewayConfig {
    pub supported_modems: ModemMask,
    pub ecm_allowed: bool,
    pub nsx_suppress: bool,
    pub nsx_replacement: [u8; 3],
    /// TCP-style unpaced transport raises the per-packet byte cap and
    /// drops the redundancy count to 1 (spec.md §4.6/§4.7).
    pub paced: bool,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            supported_modems: ModemMask::all(),
            ecm_allowed: true,
            nsx_suppress: false,
            nsx_replacement: [0, 0, 0],
            paced: true,
        }
    }
}

/// Whether the PCM-side receiver is currently listening for control (V.21)
/// or image (high-speed) traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RxMode {
    V21,
    HighSpeed(ModemMask),
}

/// Tracks whether the gateway has seen a CFR (implying a full train is in
/// progress), which forces subsequent V.17 rx to short-training mode until
/// a fresh DCS resets it to long training (spec.md §4.7's "Retraining short
/// vs long").
#[derive(Debug, Default)]
struct RetrainTracker {
    short_training: bool,
}

/// Bridges one local PCM FAX endpoint to one remote IFP packet stream.
/// Two gateways placed back-to-back (as in spec.md §8 scenario 4) let two
/// ordinary PCM [`crate::t30::Session`]s interoperate over a packet
/// network.
pub struct T38Gateway {
    config: GatewayConfig,
    mux: ModemMux,
    hdlc_rx: HdlcReceiver,
    core: T38Core,
    retrain: RetrainTracker,
    rx_mode: RxMode,
    negotiated_modem: ModemMask,
    /// Outgoing (PCM -> IFP) non-ECM bit accumulator, drained in
    /// [`bytes_per_data_packet`]-sized chunks.
    image_tx_bits: VecDeque<u8>,
    /// Reassembles one HDLC frame at a time from consecutive `HDLC_DATA`
    /// fields, closed out by an FCS marker field.
    current_hdlc_frame: Vec<u8>,
    /// Incoming (IFP -> PCM) HDLC frame jitter ring (spec.md §4.7): whole
    /// frames (with a bad-FCS flag), held back from
    /// [`Self::hdlc_tx`] until [`JITTER_LOW_WATERMARK`] bytes' worth have
    /// accumulated, so a burst of short frames doesn't start draining
    /// before there is enough backlog for jitter tolerance.
    hdlc_jitter_ring: VecDeque<(Vec<u8>, bool)>,
    jitter_draining: bool,
    /// Rebuilds real flags/bit-stuffing/CRC for frames released from
    /// [`Self::hdlc_jitter_ring`], instead of writing raw bits to the modem.
    hdlc_tx: HdlcTransmitter,
    have_seen_rx_signal: bool,
    fill_started: bool,
    tx_fill_byte: u8,
}

impl T38Gateway {
    pub fn new(config: GatewayConfig) -> Self {
        let mut mux = ModemMux::new();
        mux.start_rx_v21();
        let redundancy = if config.paced { 3 } else { 1 };
        Self {
            config,
            mux,
            hdlc_rx: HdlcReceiver::new(),
            core: T38Core::new(redundancy),
            retrain: RetrainTracker::default(),
            rx_mode: RxMode::V21,
            negotiated_modem: ModemMask::V27_2400,
            image_tx_bits: VecDeque::new(),
            current_hdlc_frame: Vec::new(),
            hdlc_jitter_ring: VecDeque::new(),
            jitter_draining: false,
            hdlc_tx: HdlcTransmitter::new(),
            have_seen_rx_signal: false,
            fill_started: false,
            tx_fill_byte: 0xff,
        }
    }

    // --- PCM -> IFP direction ---

    /// Feeds PCM samples from the local endpoint, forwarding what the
    /// gateway's own modem demodulates out to `transport` as IFP packets.
    pub fn rx_pcm(&mut self, samples: &[i16], transport: &mut impl PacketTransport) {
        for &sample in samples {
            let out = self.mux.receive_sample(sample);
            match self.rx_mode {
                RxMode::V21 => {
                    for bit in out.bits {
                        if let Some(event) = self.hdlc_rx.receive_bit(bit) {
                            self.on_hdlc_rx_event(event, transport);
                        }
                    }
                }
                RxMode::HighSpeed(modem) => {
                    self.enqueue_non_ecm_bytes(&out.bits, modem, transport);
                }
            }
            if matches!(out.event, Some(RxEvent::CarrierDown)) {
                self.on_pcm_carrier_down(transport);
            }
        }
    }

    fn on_pcm_carrier_down(&mut self, transport: &mut impl PacketTransport) {
        if !self.have_seen_rx_signal {
            return;
        }
        self.have_seen_rx_signal = false;
        match self.rx_mode {
            RxMode::V21 => {
                self.core.send_data(
                    transport,
                    DataType::V21,
                    vec![DataField {
                        field_type: FieldType::HdlcSigEnd,
                        data: Vec::new(),
                    }],
                );
            }
            RxMode::HighSpeed(modem) => {
                self.core.send_data(
                    transport,
                    data_type_for(modem),
                    vec![DataField {
                        field_type: FieldType::T4NonEcmSigEnd,
                        data: Vec::new(),
                    }],
                );
            }
        }
        self.core.send_indicator(transport, Indicator::NoSignal);
        self.hdlc_rx.reset();
    }

    fn on_hdlc_rx_event(&mut self, event: HdlcRxEvent, transport: &mut impl PacketTransport) {
        self.have_seen_rx_signal = true;
        match event {
            HdlcRxEvent::Good(mut frame) => {
                self.edit_frame_in_flight(&mut frame);
                self.note_frame_for_retrain_and_modem(&frame);
                self.core.send_data(
                    transport,
                    DataType::V21,
                    vec![DataField {
                        field_type: FieldType::HdlcData,
                        data: frame,
                    }],
                );
                self.core.send_data(
                    transport,
                    DataType::V21,
                    vec![DataField {
                        field_type: FieldType::HdlcFcsOk,
                        data: Vec::new(),
                    }],
                );
            }
            HdlcRxEvent::Bad(frame) => {
                self.core.send_data(
                    transport,
                    DataType::V21,
                    vec![DataField {
                        field_type: FieldType::HdlcData,
                        data: frame,
                    }],
                );
                self.core.send_data(
                    transport,
                    DataType::V21,
                    vec![DataField {
                        field_type: FieldType::HdlcFcsBad,
                        data: Vec::new(),
                    }],
                );
            }
            HdlcRxEvent::LengthError | HdlcRxEvent::Abort | HdlcRxEvent::FramingOk | HdlcRxEvent::FlagOnly => {}
        }
    }

    /// Applies the DIS/DCS capability clip, DIS ECM-bit clear, and NSF/NSC/
    /// NSS overwrite described in spec.md §4.7's "Frame editing", in place,
    /// before the frame is forwarded over IFP.
    fn edit_frame_in_flight(&mut self, frame: &mut Vec<u8>) {
        let Some((fcf, is_final)) = frames::read_fcf(frame) else {
            return;
        };
        match fcf {
            Fcf::Dis | Fcf::Dtc | Fcf::Dcs => {
                if let Some(mut caps) = frames::read_capability_fields(frame) {
                    caps.clip_modems(self.config.supported_modems);
                    if !self.config.ecm_allowed {
                        caps.clear_ecm();
                    }
                    *frame = frames::build(fcf, is_final, &caps.encode());
                }
            }
            Fcf::Nsf | Fcf::Csi | Fcf::Tsi if self.config.nsx_suppress => {
                for byte in frame.iter_mut().skip(3) {
                    *byte = 0;
                }
                let replace_len = frame.len().saturating_sub(3).min(self.config.nsx_replacement.len());
                frame[3..3 + replace_len].copy_from_slice(&self.config.nsx_replacement[..replace_len]);
            }
            _ => {}
        }
    }

    fn note_frame_for_retrain_and_modem(&mut self, frame: &[u8]) {
        let Some((fcf, _)) = frames::read_fcf(frame) else {
            return;
        };
        match fcf {
            Fcf::Cfr => self.retrain.short_training = true,
            Fcf::Dcs => {
                self.retrain.short_training = false;
                if let Some(caps) = frames::read_capability_fields(frame) {
                    if let Some(&(modem, _)) = crate::t30::frames::RATE_TABLE
                        .iter()
                        .find(|(m, _)| caps.modems.contains(*m))
                    {
                        self.negotiated_modem = modem;
                    }
                }
            }
            _ => {}
        }
    }

    /// Switches the PCM-side receiver to listen for the negotiated
    /// high-speed image channel instead of V.21 control frames, e.g. once
    /// the caller has observed CFR go by and expects TCF/image data next.
    /// A V.17 channel retrains short rather than long once a CFR has
    /// already been seen this call (spec.md §4.7's "Retraining short vs
    /// long"), until the next DCS resets it.
    pub fn switch_rx_to_image(&mut self) {
        let mut choice = high_speed_choice_for(self.negotiated_modem);
        if let HighSpeedChoice::V17(rate, _) = choice {
            let mode = if self.retrain.short_training {
                crate::modems::v17::TrainingMode::Short
            } else {
                crate::modems::v17::TrainingMode::Long
            };
            choice = HighSpeedChoice::V17(rate, mode);
        }
        self.mux.start_rx_high_speed(choice);
        self.rx_mode = RxMode::HighSpeed(self.negotiated_modem);
    }

    pub fn switch_rx_to_control(&mut self) {
        self.mux.start_rx_v21();
        self.rx_mode = RxMode::V21;
    }

    fn enqueue_non_ecm_bytes(&mut self, bits: &[bool], modem: ModemMask, transport: &mut impl PacketTransport) {
        for &bit in bits {
            self.image_tx_bits.push_back(bit as u8);
        }
        let bps = frames::RATE_TABLE.iter().find(|(m, _)| *m == modem).map(|(_, b)| *b).unwrap_or(9_600);
        let byte_budget = bytes_per_data_packet(bps, self.config.paced);
        let bit_budget = byte_budget * 8;
        while self.image_tx_bits.len() >= bit_budget {
            let mut out = Vec::with_capacity(byte_budget);
            while out.len() < byte_budget && self.image_tx_bits.len() >= 8 {
                let mut byte = 0u8;
                for i in 0..8 {
                    let bit = self.image_tx_bits.pop_front().unwrap_or(0);
                    byte |= bit << i;
                }
                out.push(byte);
            }
            self.core.send_data(
                transport,
                data_type_for(modem),
                vec![DataField {
                    field_type: FieldType::T4NonEcmData,
                    data: out,
                }],
            );
        }
    }

    // --- IFP -> PCM direction ---

    /// Decodes a received IFP packet and drives the local PCM-side
    /// transmitter accordingly (HDLC frame replay, non-ECM fill, or an
    /// indicator switching the local modem).
    pub fn rx_ifp_packet(&mut self, bytes: &[u8], seq_no: u16) {
        // `T38Core::rx_packet` needs `&mut self.core` and a `&mut
        // T38RxSink` that also touches the rest of `self`; swap `core`
        // out so the sink can borrow the gateway without aliasing it.
        let redundancy = if self.config.paced { 3 } else { 1 };
        let mut core = std::mem::replace(&mut self.core, T38Core::new(redundancy));
        let mut sink = GatewayIfpSink { gateway: self };
        core.rx_packet(bytes, seq_no, &mut sink);
        sink.gateway.core = core;
    }

    /// Indicators mark phase transitions on the remote side, so unlike
    /// data fields (which arrive many-per-phase) every indicator queues a
    /// fresh handler switch (spec.md §4.7, §4.8).
    fn on_remote_indicator(&mut self, indicator: Indicator) {
        self.fill_started = false;
        self.tx_fill_byte = 0xff;
        self.current_hdlc_frame.clear();
        self.hdlc_jitter_ring.clear();
        self.jitter_draining = false;
        match indicator {
            Indicator::NoSignal => {}
            Indicator::Cng => self.mux.queue_switch(NextTxHandler::Cng),
            Indicator::Ced => self.mux.queue_switch(NextTxHandler::Ced(2_600)),
            Indicator::V21Preamble => self.mux.queue_switch(NextTxHandler::V21),
            other => {
                if let Some(choice) = indicator_to_high_speed(other) {
                    self.mux.queue_switch(NextTxHandler::HighSpeed(choice));
                }
            }
        }
    }

    fn on_remote_data(&mut self, _data_type: DataType, field: &DataField) {
        match field.field_type {
            FieldType::HdlcData => {
                self.current_hdlc_frame.extend_from_slice(&field.data);
            }
            FieldType::HdlcFcsOk | FieldType::HdlcFcsOkSigEnd => self.queue_hdlc_frame(false),
            FieldType::HdlcFcsBad | FieldType::HdlcFcsBadSigEnd => self.queue_hdlc_frame(true),
            FieldType::HdlcSigEnd => self.current_hdlc_frame.clear(),
            FieldType::T4NonEcmData => {
                self.fill_started = true;
                for &byte in &field.data {
                    for i in 0..8 {
                        self.mux.push_bit((byte >> i) & 1 == 1);
                    }
                }
                self.tx_fill_byte = 0x00;
            }
            _ => {}
        }
    }

    /// Closes out the frame being reassembled from `HDLC_DATA` fields and
    /// hands it to [`Self::hdlc_jitter_ring`] for watermark-gated release.
    fn queue_hdlc_frame(&mut self, bad: bool) {
        if self.current_hdlc_frame.is_empty() {
            return;
        }
        let frame = std::mem::take(&mut self.current_hdlc_frame);
        self.hdlc_jitter_ring.push_back((frame, bad));
        let queued_bytes: usize = self.hdlc_jitter_ring.iter().map(|(f, _)| f.len()).sum();
        if queued_bytes > JITTER_RING_CAPACITY {
            log::warn!("t38 gateway: HDLC jitter ring overflowed, dropping oldest frames");
            let mut over = queued_bytes - JITTER_RING_CAPACITY;
            while over > 0 {
                let Some((dropped, _)) = self.hdlc_jitter_ring.pop_front() else { break };
                over = over.saturating_sub(dropped.len());
            }
        }
        self.drain_jitter_ring();
    }

    /// Releases ring frames to [`Self::hdlc_tx`] once at least
    /// [`JITTER_LOW_WATERMARK`] bytes' worth are queued, then drains every
    /// bit [`HdlcTransmitter`] produces (flags, bit-stuffing, and a real or
    /// deliberately-wrecked FCS) onto the local modem (spec.md §4.7's
    /// jitter buffer).
    fn drain_jitter_ring(&mut self) {
        if !self.jitter_draining {
            let queued_bytes: usize = self.hdlc_jitter_ring.iter().map(|(f, _)| f.len()).sum();
            if queued_bytes < JITTER_LOW_WATERMARK {
                return;
            }
            self.jitter_draining = true;
        }
        while let Some((frame, bad)) = self.hdlc_jitter_ring.pop_front() {
            if bad {
                self.hdlc_tx.corrupt_next_frame();
            }
            self.hdlc_tx.push_frame(&frame);
        }
        while let Some(bit) = self.hdlc_tx.next_bit() {
            self.mux.push_bit(bit);
        }
        self.jitter_draining = false;
    }

    /// Produces PCM samples for the local endpoint, padding non-ECM image
    /// channels with fill octets (spec.md §4.7's "Non-ECM forwarding") when
    /// no fresh data has arrived to maintain flow.
    pub fn tx_pcm(&mut self, out: &mut [i16]) -> usize {
        for slot in out.iter_mut() {
            if self.fill_started && self.mux.tx_is_idle() {
                for bit_i in 0..8 {
                    self.mux.push_bit((self.tx_fill_byte >> bit_i) & 1 == 1);
                }
            }
            let (sample, _event) = self.mux.next_sample();
            *slot = sample;
        }
        out.len()
    }
}

fn indicator_to_high_speed(indicator: Indicator) -> Option<HighSpeedChoice> {
    use crate::modems::{v17, v27ter, v29};
    Some(match indicator {
        Indicator::V27Ter2400Training => HighSpeedChoice::V27ter(v27ter::Rate::Bps2400),
        Indicator::V27Ter4800Training => HighSpeedChoice::V27ter(v27ter::Rate::Bps4800),
        Indicator::V29_7200Training => HighSpeedChoice::V29(v29::Rate::Bps7200),
        Indicator::V29_9600Training => HighSpeedChoice::V29(v29::Rate::Bps9600),
        Indicator::V17_7200ShortTraining => HighSpeedChoice::V17(v17::Rate::Bps7200, v17::TrainingMode::Short),
        Indicator::V17_7200LongTraining => HighSpeedChoice::V17(v17::Rate::Bps7200, v17::TrainingMode::Long),
        Indicator::V17_9600ShortTraining => HighSpeedChoice::V17(v17::Rate::Bps9600, v17::TrainingMode::Short),
        Indicator::V17_9600LongTraining => HighSpeedChoice::V17(v17::Rate::Bps9600, v17::TrainingMode::Long),
        Indicator::V17_12000ShortTraining => HighSpeedChoice::V17(v17::Rate::Bps12000, v17::TrainingMode::Short),
        Indicator::V17_12000LongTraining => HighSpeedChoice::V17(v17::Rate::Bps12000, v17::TrainingMode::Long),
        Indicator::V17_14400ShortTraining => HighSpeedChoice::V17(v17::Rate::Bps14400, v17::TrainingMode::Short),
        Indicator::V17_14400LongTraining => HighSpeedChoice::V17(v17::Rate::Bps14400, v17::TrainingMode::Long),
        _ => return None,
    })
}

struct GatewayIfpSink<'a> {
    gateway: &'a mut T38Gateway,
}

impl T38RxSink for GatewayIfpSink<'_> {
    fn on_indicator(&mut self, indicator: Indicator) {
        self.gateway.on_remote_indicator(indicator);
    }

    fn on_data(&mut self, data_type: DataType, field: &DataField) {
        self.gateway.on_remote_data(data_type, field);
    }

    fn on_missing(&mut self, gap: u16) {
        log::debug!("t38 gateway: {gap} missing packet(s), relying on next indicator to resync");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullTransport;
    impl PacketTransport for NullTransport {
        fn send_packet(&mut self, _bytes: &[u8], _copies: u8) {}
    }

    #[test]
    fn bytes_per_data_packet_matches_thirty_ms_cadence() {
        assert_eq!(bytes_per_data_packet(9_600, true), (9_600 * 30) / 8000);
        assert_eq!(bytes_per_data_packet(9_600, false), UNPACED_BYTE_CAP);
    }

    #[test]
    fn gateway_forwards_silence_as_no_signal_without_crashing() {
        let mut gateway = T38Gateway::new(GatewayConfig::default());
        let mut transport = NullTransport;
        let samples = [0i16; crate::consts::SAMPLE_RATE as usize / 100];
        gateway.rx_pcm(&samples, &mut transport);
    }

    #[test]
    fn remote_hdlc_data_is_forwarded_as_a_real_framed_bitstream() {
        let mut gateway = T38Gateway::new(GatewayConfig::default());
        gateway.on_remote_indicator(Indicator::V21Preamble);
        let original = vec![frames::ADDRESS, frames::CONTROL, 0x02, 0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF, 0x11];
        gateway.on_remote_data(
            DataType::V21,
            &DataField {
                field_type: FieldType::HdlcData,
                data: original.clone(),
            },
        );
        gateway.on_remote_data(
            DataType::V21,
            &DataField {
                field_type: FieldType::HdlcFcsOk,
                data: Vec::new(),
            },
        );
        assert!(gateway.hdlc_jitter_ring.is_empty());

        let mut samples = [0i16; 6_000];
        gateway.tx_pcm(&mut samples);

        let mut decoder = ModemMux::new();
        decoder.start_rx_v21();
        let mut hdlc_rx = HdlcReceiver::new();
        let mut decoded = None;
        for &sample in &samples {
            let out = decoder.receive_sample(sample);
            for bit in out.bits {
                if let Some(HdlcRxEvent::Good(frame)) = hdlc_rx.receive_bit(bit) {
                    decoded = Some(frame);
                }
            }
        }
        assert_eq!(decoded, Some(original));
    }

    #[test]
    fn clip_modems_narrows_a_forwarded_dis_frame() {
        let mut gateway = T38Gateway::new(GatewayConfig {
            supported_modems: ModemMask::V27_2400,
            ..GatewayConfig::default()
        });
        let mut frame = frames::build_dis(
            true,
            CapabilityFields {
                modems: ModemMask::all(),
                compression: crate::t30::frames::CompressionMask::MH,
                resolution: crate::t30::frames::ResolutionMask::STANDARD,
                page_size: crate::t30::frames::PageSizeMask::A4,
                ecm_allowed: true,
            },
        );
        gateway.edit_frame_in_flight(&mut frame);
        let caps = frames::read_capability_fields(&frame).unwrap();
        assert_eq!(caps.modems, ModemMask::V27_2400);
    }
}
