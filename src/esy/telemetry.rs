use crate::esy::value::{Rational, Snapshot, Value};

use num_enum::FromPrimitive;

/// Battery direction comes from this status register, not from the sign of
/// the power reading (which is an unsigned magnitude). Codes 6 and up are
/// vendor-specific charging states.
#[derive(Clone, Copy, Debug, Eq, PartialEq, FromPrimitive)]
#[repr(u16)]
pub enum BatteryStatus {
    Standby = 0,
    #[num_enum(default)]
    Charging = 1,
    ChargeTopping = 2,
    FloatCharge = 3,
    Full = 4,
    Discharging = 5,
}

impl BatteryStatus {
    pub fn is_charging(self) -> bool {
        matches!(
            self,
            BatteryStatus::Charging | BatteryStatus::ChargeTopping | BatteryStatus::FloatCharge
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BatteryStatus::Standby => "Standby",
            BatteryStatus::Charging => "Charging",
            BatteryStatus::ChargeTopping => "Charge Topping",
            BatteryStatus::FloatCharge => "Float Charge",
            BatteryStatus::Full => "Full",
            BatteryStatus::Discharging => "Discharging",
        }
    }
}

/// Display name for a running/pattern mode code. The table is data, not an
/// enum: firmware adds codes faster than we can.
pub fn mode_name(code: i64) -> String {
    let name = match code {
        0 => "Battery Priority Mode",
        1 => "Regular Mode",
        2 => "Grid Priority Mode",
        3 => "Electricity Sell Mode",
        4 => "Emergency Mode",
        5 => "Battery Energy Management",
        6 => "PV Mode",
        7 => "Forced Off Grid Mode",
        n => return format!("Unknown Mode ({})", n),
    };
    name.to_string()
}

/// Wire code for a mode-change request. Only a subset of modes is
/// writable; the code space differs from the display code space.
pub fn mode_code(name: &str) -> Option<u16> {
    let code = match name {
        "Regular Mode" => 1,
        "Electricity Sell Mode" => 3,
        "Emergency Mode" => 4,
        "Battery Energy Management" => 5,
        _ => return None,
    };
    Some(code)
}

pub const SELECTABLE_MODES: [&str; 4] = [
    "Regular Mode",
    "Electricity Sell Mode",
    "Emergency Mode",
    "Battery Energy Management",
];

const NOISE_FLOOR: Rational = Rational::int(10);

fn num(data: &Snapshot, key: &str) -> Option<Rational> {
    data.get(key).and_then(Value::num)
}

// first key that holds a nonzero number, like the chained `or` fallbacks
// the firmware's own app uses
fn first_nonzero(data: &Snapshot, keys: &[&str]) -> Rational {
    keys.iter()
        .filter_map(|k| num(data, k))
        .find(|v| !v.is_zero())
        .unwrap_or(Rational::ZERO)
}

fn put(data: &mut Snapshot, key: &str, value: Rational) {
    data.insert(key.to_string(), Value::Num(value));
}

fn put_text(data: &mut Snapshot, key: &str, value: String) {
    data.insert(key.to_string(), Value::Text(value));
}

/// Computes the canonical derived values from a merged raw snapshot.
///
/// Rules run in a fixed order since later sections read keys earlier ones
/// normalize. Partial uplinks are expected; anything missing falls back
/// through the alternate-source chains below.
pub fn enrich(data: &mut Snapshot) {
    derive_pv(data);
    derive_grid(data);
    derive_battery(data);
    derive_load(data);
    derive_soc(data);
    derive_passthrough(data);
    derive_modes(data);
    derive_rated_power(data);
}

fn derive_pv(data: &mut Snapshot) {
    let pv1 = num(data, "pv1Power").unwrap_or(Rational::ZERO);
    let pv2 = num(data, "pv2Power").unwrap_or(Rational::ZERO);
    let dc_pv = pv1 + pv2;

    // ct2 measures AC-coupled solar when positive; negative means
    // consumption, never generation
    let ct2 = num(data, "ct2Power").unwrap_or(Rational::ZERO);
    let ac_pv = ct2.max(Rational::ZERO);

    let total = if !dc_pv.is_zero() || !ac_pv.is_zero() {
        dc_pv + ac_pv
    } else {
        first_nonzero(data, &["energyFlowPvTotalPower", "energyFlowPv"])
    };

    put(data, "pvPower", total);
    put(data, "dcPvPower", dc_pv);
    put(data, "acPvPower", ac_pv);
    put(data, "pv1Power", pv1);
    put(data, "pv2Power", pv2);
    put(data, "pvLine", Rational::int((total > NOISE_FLOOR) as i64));
}

fn derive_grid(data: &mut Snapshot) {
    let ct1 = num(data, "ct1Power").unwrap_or(Rational::ZERO);
    let ct2 = num(data, "ct2Power").unwrap_or(Rational::ZERO);
    let active = num(data, "gridActivePower").unwrap_or(Rational::ZERO);
    let flow = first_nonzero(data, &["energyFlowGridPower", "energyFlowGrid"]);

    // source priority: ct1, gridActivePower, energy flow, then ct2 but only
    // when negative (positive ct2 is AC PV). Raw convention is
    // positive = exporting. Anything within the noise floor reads as idle.
    let raw = if ct1.abs() > NOISE_FLOOR {
        ct1
    } else if active.abs() > NOISE_FLOOR {
        active
    } else if flow.abs() > NOISE_FLOOR {
        flow
    } else if ct2 < -NOISE_FLOOR {
        ct2
    } else {
        Rational::ZERO
    };

    // published convention is the opposite: positive = importing
    put(data, "gridPower", -raw);

    if raw < Rational::ZERO {
        put(data, "gridImport", raw.abs());
        put(data, "gridExport", Rational::ZERO);
        put(data, "gridLine", Rational::ONE);
    } else if raw > Rational::ZERO {
        put(data, "gridImport", Rational::ZERO);
        put(data, "gridExport", raw);
        put(data, "gridLine", Rational::ONE);
    } else {
        put(data, "gridImport", Rational::ZERO);
        put(data, "gridExport", Rational::ZERO);
        put(data, "gridLine", Rational::ZERO);
    }
}

fn derive_battery(data: &mut Snapshot) {
    let raw = first_nonzero(
        data,
        &["batteryPower", "energyFlowBatt", "energyFlowBattPower"],
    );
    let status_code = num(data, "batteryStatus")
        .map(|v| v.as_i64())
        .unwrap_or(0)
        .clamp(0, u16::MAX as i64) as u16;
    let mut status = BatteryStatus::from_primitive(status_code);

    // the register reports a magnitude; direction is status-driven
    let power = raw.abs();

    // zero power with any non-Full status is just idle
    if power.is_zero() && status != BatteryStatus::Full {
        status = BatteryStatus::Standby;
    }

    put(data, "batteryPower", power);
    put(data, "batteryStatus", Rational::int(status_code as i64));
    put_text(data, "batteryStatusText", status.as_str().to_string());

    if status == BatteryStatus::Discharging && !power.is_zero() {
        put(data, "batteryImport", Rational::ZERO);
        put(data, "batteryExport", power);
        put(data, "batteryLine", Rational::ONE);
    } else if status.is_charging() && !power.is_zero() {
        put(data, "batteryImport", power);
        put(data, "batteryExport", Rational::ZERO);
        put(data, "batteryLine", Rational::int(2));
    } else {
        put(data, "batteryImport", Rational::ZERO);
        put(data, "batteryExport", Rational::ZERO);
        put(data, "batteryLine", Rational::ZERO);
    }
}

fn derive_load(data: &mut Snapshot) {
    let load = first_nonzero(
        data,
        &[
            "loadRealTimePower",
            "loadActivePower",
            "loadPower",
            "energyFlowLoad",
            "energyFlowLoadTotalPower",
        ],
    );
    put(data, "loadPower", load);
    put(data, "loadLine", Rational::int((load > NOISE_FLOOR) as i64));
}

fn derive_soc(data: &mut Snapshot) {
    let soc = first_nonzero(data, &["battTotalSoc", "batterySoc"]);
    let soc = if soc >= Rational::ZERO && soc <= Rational::int(100) {
        soc
    } else {
        Rational::ZERO
    };
    put(data, "batterySoc", soc);

    let soh = num(data, "batterySoh").unwrap_or(Rational::ZERO);
    put(data, "batterySoh", soh);
}

fn derive_passthrough(data: &mut Snapshot) {
    let normalized: [(&str, &[&str]); 12] = [
        ("inverterTemp", &["invTemperature", "inverterTemp"]),
        ("dcdcTemperature", &["dcdcTemperature"]),
        ("dailyPowerGeneration", &["dailyEnergyGeneration", "dailyPowerGeneration"]),
        ("totalPowerGeneration", &["totalEnergyGeneration", "totalPowerGeneration"]),
        ("dailyConsumption", &["dailyPowerConsumption", "dailyConsumption"]),
        ("dailyGridExport", &["dailyGridConnectionPower", "dailyGridExport"]),
        ("dailyBattCharge", &["dailyBattChargeEnergy", "dailyBattCharge"]),
        ("dailyBattDischarge", &["dailyBattDischargeEnergy", "dailyBattDischarge"]),
        ("gridVoltage", &["gridVolt", "gridVoltage"]),
        ("gridFrequency", &["gridFreq", "gridFrequency"]),
        ("batteryVoltage", &["batteryVoltage"]),
        ("batteryCurrent", &["batteryCurrent"]),
    ];
    for (key, sources) in normalized {
        let v = first_nonzero(data, sources);
        put(data, key, v);
    }

    for key in ["ct1Power", "ct2Power", "meterPower"] {
        let v = num(data, key).unwrap_or(Rational::ZERO);
        put(data, key, v);
    }

    let flows: [(&str, &str); 4] = [
        ("energyFlowPv", "energyFlowPvTotalPower"),
        ("energyFlowBatt", "energyFlowBattPower"),
        ("energyFlowGrid", "energyFlowGridPower"),
        ("energyFlowLoad", "energyFlowLoadTotalPower"),
    ];
    for (key, source) in flows {
        let v = first_nonzero(data, &[source, key]);
        put(data, key, v);
    }
}

fn derive_modes(data: &mut Snapshot) {
    // register 5 is the mode the system is actually running in; the
    // pattern/schedule mode (input 6, holding 57) is a separate code space
    // and must not be conflated with it
    let running = num(data, "systemRunMode")
        .map(|v| v.as_i64())
        .unwrap_or(1);
    put(data, "systemRunMode", Rational::int(running));
    put(data, "systemRunModeCode", Rational::int(running));
    put_text(data, "code", mode_name(running));

    if let Some(pattern) = num(data, "patternMode").map(|v| v.as_i64()) {
        put(data, "patternModeCode", Rational::int(pattern));
        put_text(data, "patternModeName", mode_name(pattern));
    }
}

fn derive_rated_power(data: &mut Snapshot) {
    let rated = num(data, "ratedPower").unwrap_or(Rational::ZERO);
    // some firmwares report this in hundreds of watts
    let rated = if rated > NOISE_FLOOR && rated < Rational::int(200) {
        rated.scale(100)
    } else {
        rated
    };
    put(data, "ratedPower", rated);
}
