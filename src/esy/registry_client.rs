use crate::prelude::*;

use crate::esy::registry::{ProtocolDef, RegisterDef, SegmentDef, TextMode, Truncate};
use crate::esy::value::Rational;

use chrono::Utc;
use serde::Deserialize;
use std::collections::HashMap;

pub const DEFAULT_BASE_URL: &str = "http://esybackend.esysunhome.com:7073";
const PROTOCOL_LIST_PATH: &str = "/sys/protocol/list";
const PROTOCOL_SEGMENT_PATH: &str = "/sys/protocol/segment";

/// Parameters that select which register map the vendor API returns.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DeviceVariant {
    pub pv_power: u32,
    pub tp_type: u32,
    pub mcu_version: u32,
}

impl Default for DeviceVariant {
    fn default() -> Self {
        Self {
            pv_power: 6,
            tp_type: 1,
            mcu_version: 1049,
        }
    }
}

impl DeviceVariant {
    fn cache_key(&self) -> String {
        format!("{}_{}_{}", self.pv_power, self.tp_type, self.mcu_version)
    }
}

// vendor API response shapes {{{
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    code: i32,
    msg: Option<String>,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegisterList {
    #[serde(default)]
    read_input_register: Vec<RegisterData>,
    #[serde(default)]
    read_hold_register: Vec<RegisterData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegisterData {
    #[serde(default)]
    address: Vec<AddressData>,
    data_key: Option<String>,
    data_type: Option<String>,
    // number for most registers, string for some older entries
    coefficient: Option<serde_json::Value>,
    data_length: Option<u8>,
    byte_truncate: Option<u8>,
}

#[derive(Debug, Deserialize)]
struct AddressData {
    dec: u16,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SegmentList {
    #[serde(default)]
    config_id: u32,
    #[serde(default)]
    segments: Vec<SegmentData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SegmentData {
    #[serde(default)]
    segment_id: u16,
    #[serde(default = "default_function_code")]
    function_code: u16,
    #[serde(default)]
    start_address: u16,
    #[serde(default)]
    param_num: u16,
    #[serde(default)]
    fast_up: u8,
}

fn default_function_code() -> u16 {
    4
}
// }}}

fn parse_coefficient(raw: &Option<serde_json::Value>) -> Rational {
    let repr = match raw {
        Some(serde_json::Value::Number(n)) => n.to_string(),
        Some(serde_json::Value::String(s)) if !s.is_empty() => s.clone(),
        _ => return Rational::ONE,
    };

    Rational::from_decimal(&repr).unwrap_or_else(|e| {
        warn!("bad coefficient {:?} in register list: {}", repr, e);
        Rational::ONE
    })
}

fn parse_register(data: &RegisterData) -> Option<(u16, RegisterDef)> {
    let address = data.address.first()?.dec;
    let key = data.data_key.clone()?;

    let signed = data.data_type.as_deref() == Some("signed");
    let is_text = data.data_type.as_deref() == Some("string");
    let word_count = (data.data_length.unwrap_or(2) / 2).max(1);

    Some((
        address,
        RegisterDef {
            key,
            signed,
            coefficient: parse_coefficient(&data.coefficient),
            word_count,
            truncate: Truncate::from_code(data.byte_truncate.unwrap_or(0)),
            text: is_text.then_some(TextMode::Fixed),
        },
    ))
}

/// Fetches register maps from the vendor API, with a 24-hour in-process
/// cache per device variant. Falls back to the built-in table whenever the
/// API misbehaves, so startup never blocks on the vendor being up.
pub struct RegistryClient {
    client: reqwest::Client,
    base_url: String,
    token: String,
    cache: HashMap<String, ProtocolDef>,
}

impl RegistryClient {
    pub fn new(base_url: &str, token: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
            cache: HashMap::new(),
        }
    }

    pub async fn protocol(&mut self, variant: DeviceVariant) -> ProtocolDef {
        let key = variant.cache_key();

        if let Some(cached) = self.cache.get(&key) {
            if !cached.is_expired() {
                debug!("using cached protocol definition for {}", key);
                return cached.clone();
            }
        }

        match self.fetch(variant).await {
            Ok(protocol) => {
                info!(
                    "protocol {} loaded: {} input regs, {} holding regs, {} segments",
                    protocol.config_id,
                    protocol.input_registers.len(),
                    protocol.holding_registers.len(),
                    protocol.segments.len()
                );
                self.cache.insert(key, protocol.clone());
                protocol
            }
            Err(e) => {
                warn!("protocol fetch failed ({}), using built-in fallback", e);
                ProtocolDef::fallback()
            }
        }
    }

    pub async fn fetch(&self, variant: DeviceVariant) -> Result<ProtocolDef> {
        let registers: RegisterList = self.get(PROTOCOL_LIST_PATH, variant).await?;
        let segments: SegmentList = self.get(PROTOCOL_SEGMENT_PATH, variant).await?;

        let input_registers: HashMap<u16, RegisterDef> = registers
            .read_input_register
            .iter()
            .filter_map(parse_register)
            .collect();
        let holding_registers: HashMap<u16, RegisterDef> = registers
            .read_hold_register
            .iter()
            .filter_map(parse_register)
            .collect();

        if input_registers.is_empty() {
            bail!("register list came back empty");
        }

        Ok(ProtocolDef {
            config_id: segments.config_id,
            input_registers,
            holding_registers,
            segments: segments
                .segments
                .iter()
                .map(|s| SegmentDef {
                    segment_id: s.segment_id,
                    function_code: s.function_code,
                    start_address: s.start_address,
                    param_count: s.param_num,
                    fast_upload: s.fast_up == 1,
                })
                .collect(),
            fetched_at: Utc::now(),
        })
    }

    async fn get<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        variant: DeviceVariant,
    ) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);

        let response = self
            .client
            .get(&url)
            .query(&[
                ("pvPower", variant.pv_power),
                ("tpType", variant.tp_type),
                ("mcuVersion", variant.mcu_version),
            ])
            .header("Authorization", format!("bearer {}", self.token))
            .send()
            .await?;

        if !response.status().is_success() {
            bail!("{} returned HTTP {}", url, response.status());
        }

        let envelope: Envelope<T> = response.json().await?;
        if envelope.code != 0 {
            bail!(
                "{} returned API error {}: {}",
                url,
                envelope.code,
                envelope.msg.unwrap_or_default()
            );
        }

        envelope
            .data
            .ok_or_else(|| anyhow!("{} returned an empty data field", url))
    }
}
