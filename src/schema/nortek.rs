//! Layouts of 0xA5 framed records.
//!
//! Records start with the sync byte, an id byte and, for all but the Vector
//! velocity record, a 16-bit size in words. Fields below follow that header;
//! the trailing checksum word is handled by the decoder.
use super::{BitField, Conversion, FieldSpec, Shape, Ty};
use crate::config::Configuration;

pub const SYNC: u8 = 0xa5;
pub const IMU_ID: u8 = 0x71;
/// Checksum seed added to the 16-bit word sum.
pub const CHECKSUM_SEED: u16 = 0xb58c;

/// Bytes preceding the fields of a sized record (sync, id, size).
pub const HEADER_LEN: usize = 4;

/// AHRS sub-layouts of the IMU record, keyed by their id byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ahrs {
    /// Acceleration and angular rate.
    C2,
    /// Acceleration, angular rate and orientation matrix.
    C3,
    /// Acceleration, angular rate, magnetometer and orientation matrix.
    Cc,
    /// Gyro-stabilized acceleration, angular rate and magnetometer.
    D2,
}

impl Ahrs {
    #[must_use]
    pub fn from_id(id: u8) -> Option<Ahrs> {
        match id {
            0xc2 => Some(Ahrs::C2),
            0xc3 => Some(Ahrs::C3),
            0xcc => Some(Ahrs::Cc),
            0xd2 => Some(Ahrs::D2),
            _ => None,
        }
    }

    #[must_use]
    pub fn id(self) -> u8 {
        match self {
            Ahrs::C2 => 0xc2,
            Ahrs::C3 => 0xc3,
            Ahrs::Cc => 0xcc,
            Ahrs::D2 => 0xd2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Record {
    UserConfig,
    HeadConfig,
    HardwareConfig,
    VectorVelocity,
    VectorSystem,
    VectorHeader,
    AwacProfile,
    AquadoppProfile,
    Imu(Ahrs),
}

impl Record {
    /// Records identified by their id byte alone. The IMU record needs its AHRS id
    /// as well, see [Ahrs::from_id].
    #[must_use]
    pub fn from_id(id: u8) -> Option<Record> {
        Some(match id {
            0x00 => Record::UserConfig,
            0x04 => Record::HeadConfig,
            0x05 => Record::HardwareConfig,
            0x10 => Record::VectorVelocity,
            0x11 => Record::VectorSystem,
            0x12 => Record::VectorHeader,
            0x20 => Record::AwacProfile,
            0x21 => Record::AquadoppProfile,
            _ => return None,
        })
    }

    #[must_use]
    pub fn id(self) -> u8 {
        match self {
            Record::UserConfig => 0x00,
            Record::HeadConfig => 0x04,
            Record::HardwareConfig => 0x05,
            Record::VectorVelocity => 0x10,
            Record::VectorSystem => 0x11,
            Record::VectorHeader => 0x12,
            Record::AwacProfile => 0x20,
            Record::AquadoppProfile => 0x21,
            Record::Imu(_) => IMU_ID,
        }
    }

    /// The Vector velocity record has a fixed length and no size word.
    #[must_use]
    pub fn has_size(self) -> bool {
        self != Record::VectorVelocity
    }

    /// True for the configuration block records found at the start of a file.
    #[must_use]
    pub fn is_config(self) -> bool {
        matches!(
            self,
            Record::UserConfig | Record::HeadConfig | Record::HardwareConfig
        )
    }
}

/// Length in bytes of the Vector velocity record, including sync and checksum.
pub const VECTOR_VELOCITY_LEN: usize = 24;

const VEL: Conversion = Conversion::scale(0.001);

const STATUS: &[BitField] = &[BitField {
    name: "orientation_down",
    shift: 0,
    width: 1,
}];

const HEAD_CONFIG_BITS: &[BitField] = &[
    BitField {
        name: "has_pressure",
        shift: 0,
        width: 1,
    },
    BitField {
        name: "has_compass",
        shift: 1,
        width: 1,
    },
    BitField {
        name: "has_tilt",
        shift: 2,
        width: 1,
    },
];

const HARDWARE_CONFIG: &[FieldSpec] = &[
    FieldSpec::config("serial_num", Ty::Str(14), Conversion::Identity),
    FieldSpec::config("hw_config", Ty::U16, Conversion::Identity),
    FieldSpec::config("hw_frequency", Ty::U16, Conversion::Identity),
    FieldSpec::config("pic_version", Ty::U16, Conversion::Identity),
    FieldSpec::config("hw_revision", Ty::U16, Conversion::Identity),
    FieldSpec::config("rec_size", Ty::U16, Conversion::Identity),
    FieldSpec::config("hw_status", Ty::U16, Conversion::Identity),
    FieldSpec::pad(12),
    FieldSpec::config("fw_version", Ty::Str(4), Conversion::Identity),
];

const HEAD_CONFIG: &[FieldSpec] = &[
    FieldSpec::config("head_config", Ty::U16, Conversion::Identity).with_bits(HEAD_CONFIG_BITS),
    FieldSpec::config("head_frequency", Ty::U16, Conversion::Identity),
    FieldSpec::config("head_type", Ty::U16, Conversion::Identity),
    FieldSpec::config("head_serial", Ty::Str(12), Conversion::Identity),
    FieldSpec::pad(8),
    FieldSpec::config("trans_matrix", Ty::I16, Conversion::scale(1.0 / 4096.0))
        .with_shape(Shape::Matrix(3, 3)),
    FieldSpec::pad(150),
    FieldSpec::pad(22),
    FieldSpec::config("n_beams", Ty::U16, Conversion::Identity),
];

const USER_CONFIG: &[FieldSpec] = &[
    FieldSpec::config("t1", Ty::U16, Conversion::Identity),
    FieldSpec::config("t2", Ty::U16, Conversion::Identity),
    FieldSpec::config("t3", Ty::U16, Conversion::Identity),
    FieldSpec::config("t4", Ty::U16, Conversion::Identity),
    FieldSpec::config("t5", Ty::U16, Conversion::Identity),
    FieldSpec::config("n_pings", Ty::U16, Conversion::Identity),
    FieldSpec::config("avg_interval", Ty::U16, Conversion::Identity),
    FieldSpec::config("n_beams", Ty::U16, Conversion::Identity),
    FieldSpec::config("tim_ctrl_reg", Ty::U16, Conversion::Identity),
    FieldSpec::config("pwr_ctrl_reg", Ty::U16, Conversion::Identity),
    FieldSpec::pad(6),
    FieldSpec::config("compass_upd_rate", Ty::U16, Conversion::Identity),
    FieldSpec::config("coord_sys_code", Ty::U16, Conversion::Identity),
    FieldSpec::config("n_cells", Ty::U16, Conversion::Identity),
    FieldSpec::config("bin_length", Ty::U16, Conversion::Identity),
    FieldSpec::config("meas_interval", Ty::U16, Conversion::Identity),
    FieldSpec::config("deploy_name", Ty::Str(6), Conversion::Identity),
    FieldSpec::config("wrap_mode", Ty::U16, Conversion::Identity),
    FieldSpec::pad(6),
    FieldSpec::config("diag_interval", Ty::U32, Conversion::Identity),
    FieldSpec::config("mode", Ty::U16, Conversion::Identity),
    FieldSpec::config("adj_sound_speed", Ty::U16, Conversion::Identity),
    FieldSpec::config("n_samp_diag", Ty::U16, Conversion::Identity),
    FieldSpec::config("n_beams_cell_diag", Ty::U16, Conversion::Identity),
    FieldSpec::config("n_pings_diag", Ty::U16, Conversion::Identity),
    FieldSpec::config("mode_test", Ty::U16, Conversion::Identity),
    FieldSpec::config("ana_in_addr", Ty::U16, Conversion::Identity),
    FieldSpec::config("sw_version", Ty::U16, Conversion::Identity),
    FieldSpec::config("salinity", Ty::U16, Conversion::scale(0.1)),
    // velocity adjustment table
    FieldSpec::pad(180),
    FieldSpec::config("comments", Ty::Str(180), Conversion::Identity),
    FieldSpec::pad(74),
];

const VECTOR_HEADER: &[FieldSpec] = &[
    FieldSpec::pad(6),
    FieldSpec::config("burst_n_records", Ty::U16, Conversion::Identity),
    FieldSpec::config("noise_amp", Ty::U8, Conversion::Identity).with_shape(Shape::Fixed(4)),
    FieldSpec::config("noise_corr", Ty::U8, Conversion::Identity).with_shape(Shape::Fixed(4)),
    FieldSpec::pad(20),
];

const CLOCK: &[FieldSpec] = &[
    FieldSpec::data("clk_minute", Ty::U8, Shape::Scalar, Conversion::Bcd, "1"),
    FieldSpec::data("clk_second", Ty::U8, Shape::Scalar, Conversion::Bcd, "1"),
    FieldSpec::data("clk_day", Ty::U8, Shape::Scalar, Conversion::Bcd, "1"),
    FieldSpec::data("clk_hour", Ty::U8, Shape::Scalar, Conversion::Bcd, "1"),
    FieldSpec::data("clk_year", Ty::U8, Shape::Scalar, Conversion::Bcd, "1"),
    FieldSpec::data("clk_month", Ty::U8, Shape::Scalar, Conversion::Bcd, "1"),
];

const VECTOR_SYSTEM: &[FieldSpec] = &[
    FieldSpec::data("batt", Ty::U16, Shape::Scalar, Conversion::scale(0.1), "V"),
    FieldSpec::data("c_sound", Ty::U16, Shape::Scalar, Conversion::scale(0.1), "m/s"),
    FieldSpec::data("heading", Ty::I16, Shape::Scalar, Conversion::scale(0.1), "deg"),
    FieldSpec::data("pitch", Ty::I16, Shape::Scalar, Conversion::scale(0.1), "deg"),
    FieldSpec::data("roll", Ty::I16, Shape::Scalar, Conversion::scale(0.1), "deg"),
    FieldSpec::data("temp", Ty::I16, Shape::Scalar, Conversion::scale(0.01), "degree_C"),
    FieldSpec::data("error", Ty::U8, Shape::Scalar, Conversion::Identity, "1"),
    FieldSpec::data("status", Ty::U8, Shape::Scalar, Conversion::Identity, "1").with_bits(STATUS),
    FieldSpec::data("ana_in", Ty::U16, Shape::Scalar, Conversion::Identity, "1"),
];

const VECTOR_VELOCITY: &[FieldSpec] = &[
    FieldSpec::data("ana_in2_lsb", Ty::U8, Shape::Scalar, Conversion::Identity, "1"),
    FieldSpec::data("count", Ty::U8, Shape::Scalar, Conversion::Identity, "1"),
    FieldSpec::data("pressure_msb", Ty::U8, Shape::Scalar, Conversion::scale(65.536), "dbar"),
    FieldSpec::data("ana_in2_msb", Ty::U8, Shape::Scalar, Conversion::scale(256.0), "1"),
    FieldSpec::data("pressure_lsw", Ty::U16, Shape::Scalar, Conversion::scale(0.001), "dbar"),
    FieldSpec::data("ana_in1", Ty::U16, Shape::Scalar, Conversion::Identity, "1"),
    FieldSpec::data("vel", Ty::I16, Shape::Fixed(3), VEL, "m/s"),
    FieldSpec::data("amp", Ty::U8, Shape::Fixed(3), Conversion::Identity, "counts"),
    FieldSpec::data("corr", Ty::U8, Shape::Fixed(3), Conversion::Identity, "%"),
];

/// Sensor block shared by both profile records.
const PROFILE_SENSORS: &[FieldSpec] = &[
    FieldSpec::data("error", Ty::I16, Shape::Scalar, Conversion::Identity, "1"),
    FieldSpec::data("ana_in1", Ty::U16, Shape::Scalar, Conversion::Identity, "1"),
    FieldSpec::data("batt", Ty::U16, Shape::Scalar, Conversion::scale(0.1), "V"),
    FieldSpec::data("c_sound", Ty::U16, Shape::Scalar, Conversion::scale(0.1), "m/s"),
    FieldSpec::data("heading", Ty::I16, Shape::Scalar, Conversion::scale(0.1), "deg"),
    FieldSpec::data("pitch", Ty::I16, Shape::Scalar, Conversion::scale(0.1), "deg"),
    FieldSpec::data("roll", Ty::I16, Shape::Scalar, Conversion::scale(0.1), "deg"),
    FieldSpec::data("pressure_msb", Ty::U8, Shape::Scalar, Conversion::scale(65.536), "dbar"),
    FieldSpec::data("status", Ty::U8, Shape::Scalar, Conversion::Identity, "1").with_bits(STATUS),
    FieldSpec::data("pressure_lsw", Ty::U16, Shape::Scalar, Conversion::scale(0.001), "dbar"),
    FieldSpec::data("temp", Ty::I16, Shape::Scalar, Conversion::scale(0.01), "degree_C"),
];

const PROFILE_DATA: &[FieldSpec] = &[
    FieldSpec::data("vel", Ty::I16, Shape::BeamCells, VEL, "m/s"),
    FieldSpec::data("amp", Ty::U8, Shape::BeamCells, Conversion::Identity, "counts"),
];

const G: f64 = 9.80665;
const TIMER: FieldSpec =
    FieldSpec::data("imu_timer", Ty::U32, Shape::Scalar, Conversion::scale(1.0 / 62500.0), "s");
const ACCEL: FieldSpec =
    FieldSpec::data("accel", Ty::F32, Shape::Fixed(3), Conversion::scale(G), "m/s^2");
const ANGRT: FieldSpec =
    FieldSpec::data("angrt", Ty::F32, Shape::Fixed(3), Conversion::Identity, "rad/s");
const MAG: FieldSpec =
    FieldSpec::data("mag", Ty::F32, Shape::Fixed(3), Conversion::Identity, "gauss");
const ORIENTMAT: FieldSpec =
    FieldSpec::data("orientmat", Ty::F32, Shape::Matrix(3, 3), Conversion::Identity, "1");

/// Layout of `record`. Profile sizes follow from `n_beams`/`n_cells` in `cfg`
/// through [super::Geometry], so the returned list does not depend on them.
#[must_use]
pub fn schema(record: Record, _cfg: &Configuration) -> Vec<FieldSpec> {
    match record {
        Record::HardwareConfig => HARDWARE_CONFIG.to_vec(),
        Record::HeadConfig => HEAD_CONFIG.to_vec(),
        Record::UserConfig => USER_CONFIG.to_vec(),
        Record::VectorHeader => VECTOR_HEADER.to_vec(),
        Record::VectorSystem => [CLOCK, VECTOR_SYSTEM].concat(),
        Record::VectorVelocity => VECTOR_VELOCITY.to_vec(),
        Record::AwacProfile => {
            [CLOCK, PROFILE_SENSORS, &[FieldSpec::pad(88)][..], PROFILE_DATA].concat()
        }
        Record::AquadoppProfile => [CLOCK, PROFILE_SENSORS, PROFILE_DATA].concat(),
        Record::Imu(Ahrs::C2) => vec![ACCEL, ANGRT, TIMER],
        Record::Imu(Ahrs::C3) => vec![ACCEL, ANGRT, ORIENTMAT, TIMER],
        Record::Imu(Ahrs::Cc) => vec![ACCEL, ANGRT, MAG, ORIENTMAT, TIMER],
        Record::Imu(Ahrs::D2) => vec![ACCEL, ANGRT, MAG, TIMER],
    }
}
