//! Plain data records exchanged with table writers and readers.

use uuid::Uuid;

/// Index of one row in the signal table.
pub type SignalTableRowIndex = u64;

/// Index into the pore-type dictionary.
pub type PoreDictionaryIndex = i16;
/// Index into the end-reason dictionary.
pub type EndReasonDictionaryIndex = i16;
/// Index into the run-info dictionary.
pub type RunInfoDictionaryIndex = i16;

/// Per-read metadata appended to the read table.
///
/// The three dictionary indices come from the corresponding dictionary
/// writers of the same file writer.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadData {
    pub read_id: Uuid,
    pub read_number: u32,
    pub start_sample: u64,
    pub median_before: f32,
    pub num_minknow_events: u64,
    pub tracked_scaling_scale: f32,
    pub tracked_scaling_shift: f32,
    pub predicted_scaling_scale: f32,
    pub predicted_scaling_shift: f32,
    pub num_reads_since_mux_change: u32,
    pub time_since_mux_change: f32,
    pub channel: u16,
    pub well: u8,
    pub pore_type: PoreDictionaryIndex,
    pub calibration_offset: f32,
    pub calibration_scale: f32,
    pub end_reason: EndReasonDictionaryIndex,
    pub end_reason_forced: bool,
    pub run_info: RunInfoDictionaryIndex,
}

/// Pore description: the physical channel and well a read came from, plus
/// the pore type it was sequenced with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoreData {
    pub channel: u16,
    pub well: u8,
    pub pore_type: String,
}

impl PoreData {
    pub fn new(channel: u16, well: u8, pore_type: impl Into<String>) -> Self {
        Self {
            channel,
            well,
            pore_type: pore_type.into(),
        }
    }
}

/// Calibration applied to convert raw ADC samples to picoamps.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CalibrationData {
    pub offset: f32,
    pub scale: f32,
}

impl CalibrationData {
    pub fn new(offset: f32, scale: f32) -> Self {
        Self { offset, scale }
    }
}

/// Why a read ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum EndReason {
    #[default]
    Unknown,
    MuxChange,
    UnblockMuxChange,
    DataServiceUnblockMuxChange,
    SignalPositive,
    SignalNegative,
}

impl EndReason {
    pub fn as_str(self) -> &'static str {
        match self {
            EndReason::MuxChange => "mux_change",
            EndReason::UnblockMuxChange => "unblock_mux_change",
            EndReason::DataServiceUnblockMuxChange => "data_service_unblock_mux_change",
            EndReason::SignalPositive => "signal_positive",
            EndReason::SignalNegative => "signal_negative",
            EndReason::Unknown => "unknown",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        Some(match name {
            "mux_change" => EndReason::MuxChange,
            "unblock_mux_change" => EndReason::UnblockMuxChange,
            "data_service_unblock_mux_change" => EndReason::DataServiceUnblockMuxChange,
            "signal_positive" => EndReason::SignalPositive,
            "signal_negative" => EndReason::SignalNegative,
            "unknown" => EndReason::Unknown,
            _ => return None,
        })
    }
}

/// An end reason together with whether it was forced by the data service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndReasonData {
    pub end_reason: EndReason,
    pub forced: bool,
}

impl EndReasonData {
    pub fn new(end_reason: EndReason, forced: bool) -> Self {
        Self { end_reason, forced }
    }
}

/// String-to-string tag maps carried by run info.
pub type RunInfoMap = Vec<(String, String)>;

/// One acquisition's run information. Deduplicated per file and referenced
/// from read rows by acquisition id.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RunInfoData {
    pub acquisition_id: String,
    /// Milliseconds since the Unix epoch.
    pub acquisition_start_time_ms: i64,
    pub adc_max: i16,
    pub adc_min: i16,
    pub context_tags: RunInfoMap,
    pub experiment_name: String,
    pub flow_cell_id: String,
    pub flow_cell_product_code: String,
    pub protocol_name: String,
    pub protocol_run_id: String,
    /// Milliseconds since the Unix epoch.
    pub protocol_start_time_ms: i64,
    pub sample_id: String,
    pub sample_rate: u16,
    pub sequencing_kit: String,
    pub sequencer_position: String,
    pub sequencer_position_type: String,
    pub software: String,
    pub system_name: String,
    pub system_type: String,
    pub tracking_id: RunInfoMap,
}
