//! PD0 ensemble record layouts.
//!
//! Every record begins with a two byte little-endian id which is consumed by the
//! decoder before the fields listed here are read.
use super::{BitField, Conversion, FieldSpec, Shape, Ty};
use crate::config::{Configuration, Firmware};

/// Ensemble header id, also the sync pattern.
pub const HEADER_ID: u16 = 0x7f7f;

const MISSING_VEL: Conversion = Conversion::Masked {
    missing: -32768.0,
    scale: 0.001,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Record {
    FixedLeader,
    VariableLeader,
    Velocity,
    Correlation,
    Echo,
    PercentGood,
    Status,
    BottomTrack,
    VmdasNav,
    /// Known record that is not decoded and is stepped over using the
    /// ensemble's offset table.
    Skipped(u16),
}

impl Record {
    #[must_use]
    pub fn from_id(id: u16) -> Option<Record> {
        Some(match id {
            0x0000 => Record::FixedLeader,
            0x0080 => Record::VariableLeader,
            0x0100 => Record::Velocity,
            0x0200 => Record::Correlation,
            0x0300 => Record::Echo,
            0x0400 => Record::PercentGood,
            0x0500 => Record::Status,
            0x0600 => Record::BottomTrack,
            0x2000 => Record::VmdasNav,
            // fifth beam and surface layer
            0x0701..=0x0704 | 0x0a00..=0x0f01 => Record::Skipped(id),
            // nmea, winriver and attitude blocks
            0x2022 | 0x2100..=0x2104 | 0x3000..=0x30fc => Record::Skipped(id),
            // range, sea-seven
            0x4100 | 0x5803 | 0x7000..=0x7004 => Record::Skipped(id),
            _ => return None,
        })
    }

    #[must_use]
    pub fn id(self) -> u16 {
        match self {
            Record::FixedLeader => 0x0000,
            Record::VariableLeader => 0x0080,
            Record::Velocity => 0x0100,
            Record::Correlation => 0x0200,
            Record::Echo => 0x0300,
            Record::PercentGood => 0x0400,
            Record::Status => 0x0500,
            Record::BottomTrack => 0x0600,
            Record::VmdasNav => 0x2000,
            Record::Skipped(id) => id,
        }
    }
}

const SYS_CONFIG: &[BitField] = &[
    BitField {
        name: "freq_code",
        shift: 0,
        width: 3,
    },
    BitField {
        name: "convex",
        shift: 3,
        width: 1,
    },
    BitField {
        name: "sensor_config",
        shift: 4,
        width: 2,
    },
    BitField {
        name: "xducer_attached",
        shift: 6,
        width: 1,
    },
    BitField {
        name: "upward",
        shift: 7,
        width: 1,
    },
    BitField {
        name: "beam_angle_code",
        shift: 8,
        width: 2,
    },
    BitField {
        name: "janus_config",
        shift: 12,
        width: 4,
    },
];

const COORD_TRANSFORM: &[BitField] = &[
    BitField {
        name: "bin_mapping",
        shift: 0,
        width: 1,
    },
    BitField {
        name: "use_3beam",
        shift: 1,
        width: 1,
    },
    BitField {
        name: "use_tilts",
        shift: 2,
        width: 1,
    },
    BitField {
        name: "coord_sys_code",
        shift: 3,
        width: 2,
    },
];

const FIXED_LEADER: &[FieldSpec] = &[
    FieldSpec::config("fw_ver", Ty::U8, Conversion::Identity),
    FieldSpec::config("fw_rev", Ty::U8, Conversion::Identity),
    FieldSpec::config("sys_config", Ty::U16, Conversion::Identity).with_bits(SYS_CONFIG),
    FieldSpec::config("simulated", Ty::U8, Conversion::Identity),
    FieldSpec::config("lag_length", Ty::U8, Conversion::Identity),
    FieldSpec::config("n_beams", Ty::U8, Conversion::Identity),
    FieldSpec::config("n_cells", Ty::U8, Conversion::Identity),
    FieldSpec::config("pings_per_ensemble", Ty::U16, Conversion::Identity),
    FieldSpec::config("cell_size", Ty::U16, Conversion::scale(0.01)),
    FieldSpec::config("blank_dist", Ty::U16, Conversion::scale(0.01)),
    FieldSpec::config("profiling_mode", Ty::U8, Conversion::Identity),
    FieldSpec::config("min_corr_threshold", Ty::U8, Conversion::Identity),
    FieldSpec::config("n_code_reps", Ty::U8, Conversion::Identity),
    FieldSpec::config("min_prcnt_gd", Ty::U8, Conversion::Identity),
    FieldSpec::config("max_error_vel", Ty::U16, Conversion::scale(0.001)),
    FieldSpec::config("tpp_min", Ty::U8, Conversion::Identity),
    FieldSpec::config("tpp_sec", Ty::U8, Conversion::Identity),
    FieldSpec::config("tpp_hund", Ty::U8, Conversion::Identity),
    FieldSpec::config("coord_transform", Ty::U8, Conversion::Identity).with_bits(COORD_TRANSFORM),
    FieldSpec::config("heading_misalign", Ty::I16, Conversion::scale(0.01)),
    FieldSpec::config("magnetic_var", Ty::I16, Conversion::scale(0.01)),
    FieldSpec::config("sensors_src", Ty::U8, Conversion::Identity),
    FieldSpec::config("sensors_avail", Ty::U8, Conversion::Identity),
    FieldSpec::config("bin1_dist", Ty::U16, Conversion::scale(0.01)),
    FieldSpec::config("xmit_pulse", Ty::U16, Conversion::scale(0.01)),
    FieldSpec::config("water_ref_start", Ty::U8, Conversion::Identity),
    FieldSpec::config("water_ref_end", Ty::U8, Conversion::Identity),
    FieldSpec::config("false_target_threshold", Ty::U8, Conversion::Identity),
    FieldSpec::pad(1),
    FieldSpec::config("xmit_lag", Ty::U16, Conversion::scale(0.01)),
];

/// Serial number and beam angle tail, firmware 10 and later.
const FIXED_LEADER_TAIL: &[FieldSpec] = &[
    FieldSpec::pad(8),
    FieldSpec::config("bandwidth", Ty::U16, Conversion::Identity),
    FieldSpec::config("power_level", Ty::U8, Conversion::Identity),
    FieldSpec::pad(1),
    FieldSpec::config("serial_num", Ty::U32, Conversion::Identity),
    FieldSpec::config("beam_angle", Ty::U8, Conversion::Identity),
];

const VARIABLE_LEADER: &[FieldSpec] = &[
    FieldSpec::data("number", Ty::U16, Shape::Scalar, Conversion::Identity, "1"),
    FieldSpec::data("rtc_year", Ty::U8, Shape::Scalar, Conversion::Identity, "1"),
    FieldSpec::data("rtc_month", Ty::U8, Shape::Scalar, Conversion::Identity, "1"),
    FieldSpec::data("rtc_day", Ty::U8, Shape::Scalar, Conversion::Identity, "1"),
    FieldSpec::data("rtc_hour", Ty::U8, Shape::Scalar, Conversion::Identity, "1"),
    FieldSpec::data("rtc_minute", Ty::U8, Shape::Scalar, Conversion::Identity, "1"),
    FieldSpec::data("rtc_second", Ty::U8, Shape::Scalar, Conversion::Identity, "1"),
    FieldSpec::data("rtc_hundredths", Ty::U8, Shape::Scalar, Conversion::Identity, "1"),
    FieldSpec::data("number_msb", Ty::U8, Shape::Scalar, Conversion::scale(65536.0), "1"),
    FieldSpec::data("builtin_test_fail", Ty::U16, Shape::Scalar, Conversion::Identity, "1"),
    FieldSpec::data("c_sound", Ty::U16, Shape::Scalar, Conversion::Identity, "m/s"),
    FieldSpec::data("depth", Ty::U16, Shape::Scalar, Conversion::scale(0.1), "m"),
    FieldSpec::data("heading", Ty::U16, Shape::Scalar, Conversion::scale(0.01), "deg"),
    FieldSpec::data("pitch", Ty::I16, Shape::Scalar, Conversion::scale(0.01), "deg"),
    FieldSpec::data("roll", Ty::I16, Shape::Scalar, Conversion::scale(0.01), "deg"),
    FieldSpec::data("salinity", Ty::U16, Shape::Scalar, Conversion::Identity, "psu"),
    FieldSpec::data("temp", Ty::I16, Shape::Scalar, Conversion::scale(0.01), "degree_C"),
    FieldSpec::pad(3),
    FieldSpec::data("heading_std", Ty::U8, Shape::Scalar, Conversion::Identity, "deg"),
    FieldSpec::data("pitch_std", Ty::U8, Shape::Scalar, Conversion::scale(0.1), "deg"),
    FieldSpec::data("roll_std", Ty::U8, Shape::Scalar, Conversion::scale(0.1), "deg"),
    FieldSpec::data("adc", Ty::U8, Shape::Fixed(8), Conversion::Identity, "1"),
    FieldSpec::data("error_status", Ty::U32, Shape::Scalar, Conversion::Identity, "1"),
    FieldSpec::pad(2),
];

/// Pressure block, firmware 8 and later.
const VARIABLE_LEADER_PRESSURE: &[FieldSpec] = &[
    FieldSpec::data("pressure", Ty::U32, Shape::Scalar, Conversion::scale(0.001), "dbar"),
    FieldSpec::data("pressure_std", Ty::U32, Shape::Scalar, Conversion::scale(0.001), "dbar"),
    FieldSpec::pad(1),
];

/// Four digit year clock, firmware 10 and later.
const VARIABLE_LEADER_Y2K: &[FieldSpec] = &[
    FieldSpec::data("y2k_century", Ty::U8, Shape::Scalar, Conversion::Identity, "1"),
    FieldSpec::data("y2k_year", Ty::U8, Shape::Scalar, Conversion::Identity, "1"),
    FieldSpec::data("y2k_month", Ty::U8, Shape::Scalar, Conversion::Identity, "1"),
    FieldSpec::data("y2k_day", Ty::U8, Shape::Scalar, Conversion::Identity, "1"),
    FieldSpec::data("y2k_hour", Ty::U8, Shape::Scalar, Conversion::Identity, "1"),
    FieldSpec::data("y2k_minute", Ty::U8, Shape::Scalar, Conversion::Identity, "1"),
    FieldSpec::data("y2k_second", Ty::U8, Shape::Scalar, Conversion::Identity, "1"),
    FieldSpec::data("y2k_hundredths", Ty::U8, Shape::Scalar, Conversion::Identity, "1"),
];

const BOTTOM_TRACK: &[FieldSpec] = &[
    FieldSpec::config("bt_pings_per_ensemble", Ty::U16, Conversion::Identity),
    FieldSpec::config("bt_delay_reacquire", Ty::U16, Conversion::Identity),
    FieldSpec::config("bt_min_corr", Ty::U8, Conversion::Identity),
    FieldSpec::config("bt_min_amp", Ty::U8, Conversion::Identity),
    FieldSpec::config("bt_min_prcnt_gd", Ty::U8, Conversion::Identity),
    FieldSpec::config("bt_mode", Ty::U8, Conversion::Identity),
    FieldSpec::config("bt_max_error_vel", Ty::U16, Conversion::scale(0.001)),
    FieldSpec::pad(4),
    FieldSpec::data("bt_range_lsb", Ty::U16, Shape::Fixed(4), Conversion::scale(0.01), "m"),
    FieldSpec::data("bt_vel", Ty::I16, Shape::Fixed(4), MISSING_VEL, "m/s"),
    FieldSpec::data("bt_corr", Ty::U8, Shape::Fixed(4), Conversion::Identity, "counts"),
    FieldSpec::data("bt_amp", Ty::U8, Shape::Fixed(4), Conversion::Identity, "counts"),
    FieldSpec::data("bt_prcnt_gd", Ty::U8, Shape::Fixed(4), Conversion::Identity, "%"),
    // reference layer setup, velocity and quality
    FieldSpec::pad(26),
    FieldSpec::pad(2),
    FieldSpec::data("bt_rssi", Ty::U8, Shape::Fixed(4), Conversion::Identity, "counts"),
    FieldSpec::pad(1),
    FieldSpec::data("bt_range_msb", Ty::U8, Shape::Fixed(4), Conversion::scale(655.36), "m"),
];

const BAM32: Conversion = Conversion::Bam { bits: 32 };
const BAM16: Conversion = Conversion::Bam { bits: 16 };

const VMDAS_NAV: &[FieldSpec] = &[
    FieldSpec::data("nav_day", Ty::U8, Shape::Scalar, Conversion::Identity, "1"),
    FieldSpec::data("nav_month", Ty::U8, Shape::Scalar, Conversion::Identity, "1"),
    FieldSpec::data("nav_year", Ty::U16, Shape::Scalar, Conversion::Identity, "1"),
    FieldSpec::data("nav_utc_first", Ty::U32, Shape::Scalar, Conversion::scale(1e-4), "s"),
    FieldSpec::data("nav_pc_offset", Ty::I32, Shape::Scalar, Conversion::scale(0.001), "s"),
    FieldSpec::data("latitude_gps", Ty::I32, Shape::Scalar, BAM32, "degrees_north"),
    FieldSpec::data("longitude_gps", Ty::I32, Shape::Scalar, BAM32, "degrees_east"),
    // last fix time and position
    FieldSpec::pad(12),
    FieldSpec::data("speed_over_grnd", Ty::I16, Shape::Scalar, Conversion::scale(0.001), "m/s"),
    FieldSpec::data("track_true", Ty::U16, Shape::Scalar, BAM16, "deg"),
    FieldSpec::pad(2),
    FieldSpec::data("speed_made_good", Ty::I16, Shape::Scalar, Conversion::scale(0.001), "m/s"),
    FieldSpec::data("dir_made_good", Ty::U16, Shape::Scalar, BAM16, "deg"),
    FieldSpec::pad(2),
    FieldSpec::data("nav_flags", Ty::U16, Shape::Scalar, Conversion::Identity, "1"),
    FieldSpec::pad(2),
    // vmdas ensemble number, pc clock and attitude
    FieldSpec::pad(28),
];

/// Layout of `record` for configuration `cfg`. Returns an empty list for
/// [Record::Skipped] records.
#[must_use]
pub fn schema(record: Record, cfg: &Configuration) -> Vec<FieldSpec> {
    let fw = cfg.firmware().unwrap_or_default();
    let profile = |name, ty, conv, units| {
        vec![FieldSpec::data(name, ty, Shape::CellBeams, conv, units)]
    };
    match record {
        Record::FixedLeader => fixed_leader(fw),
        Record::VariableLeader => {
            let mut specs = VARIABLE_LEADER.to_vec();
            if fw.major >= 8 {
                specs.extend_from_slice(VARIABLE_LEADER_PRESSURE);
            }
            if fw.major >= 10 {
                specs.extend_from_slice(VARIABLE_LEADER_Y2K);
            }
            specs
        }
        Record::Velocity => profile("vel", Ty::I16, MISSING_VEL, "m/s"),
        Record::Correlation => profile("corr", Ty::U8, Conversion::Identity, "counts"),
        Record::Echo => profile("amp", Ty::U8, Conversion::Identity, "counts"),
        Record::PercentGood => profile("prcnt_gd", Ty::U8, Conversion::Identity, "%"),
        Record::Status => profile("status", Ty::U8, Conversion::Identity, "1"),
        Record::BottomTrack => BOTTOM_TRACK.to_vec(),
        Record::VmdasNav => VMDAS_NAV.to_vec(),
        Record::Skipped(_) => Vec::new(),
    }
}

/// Fixed leader layout. The firmware version is the first field, so the
/// decoder reads it with the base layout and asks again for the tail.
#[must_use]
pub fn fixed_leader(fw: Firmware) -> Vec<FieldSpec> {
    let mut specs = FIXED_LEADER.to_vec();
    if fw.major >= 10 {
        specs.extend_from_slice(FIXED_LEADER_TAIL);
    }
    specs
}

/// Beam angle in degrees encoded in the system configuration word.
#[must_use]
pub fn beam_angle_from_code(code: u64) -> f64 {
    match code {
        0 => 15.0,
        2 => 30.0,
        _ => 20.0,
    }
}
