use crate::esy::value::Rational;

use chrono::{DateTime, Duration, Utc};
use num_enum::{IntoPrimitive, TryFromPrimitive};
use std::collections::HashMap;

/// Registers live in two address spaces, selected by the segment type.
#[derive(Clone, Copy, Debug, Eq, PartialEq, IntoPrimitive, TryFromPrimitive)]
#[repr(u16)]
pub enum FunctionCode {
    Holding = 3,
    Input = 4,
}

/// Post-processing applied to a register word before scaling.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Default)]
pub enum Truncate {
    #[default]
    None,
    /// High byte only.
    High,
    /// Low byte only.
    Low,
    /// Byte-triplet date, year offset from 2000 by +15, month/day by +1.
    Date,
    /// Consumed but never surfaced.
    Skip,
}

impl Truncate {
    /// Wire codes used by the vendor register tables.
    pub fn from_code(code: u8) -> Self {
        match code {
            1 => Truncate::High,
            2 => Truncate::Low,
            7 => Truncate::Date,
            8 | 10 => Truncate::Skip,
            _ => Truncate::None,
        }
    }
}

/// How a run of register words decodes to UTF-8 text.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TextMode {
    /// First byte is the string length.
    VarLen,
    /// Whole run, trailing NULs stripped.
    Fixed,
    /// Bytes swapped within each word before decoding.
    PairSwapped,
}

#[derive(Clone, Debug)]
pub struct RegisterDef {
    pub key: String,
    pub signed: bool,
    pub coefficient: Rational,
    /// Number of 16-bit words the register occupies. 2 = 32-bit value,
    /// more for text registers.
    pub word_count: u8,
    pub truncate: Truncate,
    pub text: Option<TextMode>,
}

impl RegisterDef {
    fn scalar(key: &str, signed: bool, coefficient: Rational) -> Self {
        Self {
            key: key.to_string(),
            signed,
            coefficient,
            word_count: 1,
            truncate: Truncate::None,
            text: None,
        }
    }

    fn wide(key: &str, signed: bool, coefficient: Rational) -> Self {
        Self {
            word_count: 2,
            ..Self::scalar(key, signed, coefficient)
        }
    }
}

/// Older firmware published several keys under different names. Decoded
/// values are stored under both so downstream consumers keep working.
pub fn legacy_alias(key: &str) -> Option<&'static str> {
    let alias = match key {
        "battTotalSoc" => "batterySoc",
        "ct1Power" => "gridPower",
        "loadRealTimePower" => "loadPower",
        "gridFreq" => "gridFrequency",
        "gridVolt" => "gridVoltage",
        "invTemperature" => "inverterTemp",
        "pv1voltage" => "pv1Voltage",
        "pv1current" => "pv1Current",
        "pv2voltage" => "pv2Voltage",
        "pv2current" => "pv2Current",
        "dailyEnergyGeneration" => "dailyPowerGeneration",
        "totalEnergyGeneration" => "totalPowerGeneration",
        "dailyPowerConsumption" => "dailyConsumption",
        "dailyBattChargeEnergy" => "dailyBattCharge",
        "dailyBattDischargeEnergy" => "dailyBattDischarge",
        "dailyGridConnectionPower" => "dailyGridExport",
        "energyFlowPvTotalPower" => "energyFlowPv",
        "energyFlowBattPower" => "energyFlowBatt",
        "energyFlowGridPower" => "energyFlowGrid",
        "energyFlowLoadTotalPower" => "energyFlowLoad",
        _ => return None,
    };
    Some(alias)
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SegmentDef {
    pub segment_id: u16,
    pub function_code: u16,
    pub start_address: u16,
    pub param_count: u16,
    pub fast_upload: bool,
}

/// Complete register map for one device variant.
#[derive(Clone, Debug)]
pub struct ProtocolDef {
    pub config_id: u32,
    pub input_registers: HashMap<u16, RegisterDef>,
    pub holding_registers: HashMap<u16, RegisterDef>,
    pub segments: Vec<SegmentDef>,
    pub fetched_at: DateTime<Utc>,
}

const CACHE_HOURS: i64 = 24;

impl ProtocolDef {
    pub fn get_register(&self, address: u16, function_code: u16) -> Option<&RegisterDef> {
        match FunctionCode::try_from(function_code).ok()? {
            FunctionCode::Input => self.input_registers.get(&address),
            FunctionCode::Holding => self.holding_registers.get(&address),
        }
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() - self.fetched_at > Duration::hours(CACHE_HOURS)
    }

    /// Built-in register map, used when the vendor API is unreachable.
    /// Known-good for the common 6kW single-phase variant.
    pub fn fallback() -> ProtocolDef {
        let unit = Rational::ONE;
        let tenth = Rational::new(1, 10);
        let hundredth = Rational::new(1, 100);
        let milli = Rational::new(1, 1000);
        let ten = Rational::int(10);
        let hundred = Rational::int(100);

        let inputs = [
            (5, RegisterDef::scalar("systemRunMode", false, unit)),
            (6, RegisterDef::scalar("patternMode", false, unit)),
            (7, RegisterDef::scalar("dcdcTemperature", true, tenth)),
            (10, RegisterDef::wide("dailyEnergyGeneration", false, milli)),
            (12, RegisterDef::wide("totalEnergyGeneration", false, milli)),
            (14, RegisterDef::scalar("ratedPower", true, hundred)),
            (20, RegisterDef::scalar("pv1voltage", true, tenth)),
            (21, RegisterDef::scalar("pv1current", true, tenth)),
            (22, RegisterDef::scalar("pv1Power", true, unit)),
            (23, RegisterDef::scalar("pv2voltage", true, tenth)),
            (24, RegisterDef::scalar("pv2current", true, tenth)),
            (25, RegisterDef::scalar("pv2Power", true, unit)),
            (28, RegisterDef::scalar("batteryStatus", false, unit)),
            (29, RegisterDef::scalar("batteryVoltage", true, tenth)),
            (30, RegisterDef::scalar("batteryCurrent", true, tenth)),
            (31, RegisterDef::scalar("batteryPower", true, unit)),
            (32, RegisterDef::scalar("battTotalSoc", true, unit)),
            (39, RegisterDef::scalar("gridFreq", true, hundredth)),
            (42, RegisterDef::scalar("gridVolt", true, tenth)),
            (46, RegisterDef::scalar("gridActivePower", true, unit)),
            (49, RegisterDef::scalar("ct1Power", true, unit)),
            (52, RegisterDef::scalar("invTemperature", true, tenth)),
            (56, RegisterDef::scalar("ct2Power", true, unit)),
            (71, RegisterDef::scalar("energyFlowPvTotalPower", true, ten)),
            (72, RegisterDef::scalar("energyFlowBattPower", true, ten)),
            (73, RegisterDef::scalar("energyFlowGridPower", true, ten)),
            (74, RegisterDef::scalar("energyFlowLoadTotalPower", true, ten)),
            (84, RegisterDef::scalar("loadActivePower", true, unit)),
            (90, RegisterDef::scalar("loadRealTimePower", true, unit)),
            (104, RegisterDef::scalar("meterPower", true, unit)),
            (126, RegisterDef::wide("dailyPowerConsumption", false, milli)),
            (128, RegisterDef::wide("dailyGridConnectionPower", false, milli)),
            (136, RegisterDef::wide("dailyBattChargeEnergy", false, milli)),
            (140, RegisterDef::wide("dailyBattDischargeEnergy", false, milli)),
            (290, RegisterDef::scalar("batterySoc", false, unit)),
            (291, RegisterDef::scalar("batterySoh", false, unit)),
        ];

        let mut holding_registers = HashMap::new();
        holding_registers.insert(57, RegisterDef::scalar("patternMode", false, unit));
        // hourly schedule slots
        for hour in 0..24u16 {
            holding_registers.insert(
                196 + hour,
                RegisterDef::scalar(&format!("runModeSet{}h", hour), false, unit),
            );
        }

        ProtocolDef {
            config_id: 6,
            input_registers: inputs.into_iter().collect(),
            holding_registers,
            segments: Vec::new(),
            fetched_at: Utc::now(),
        }
    }
}
