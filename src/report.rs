//! Authenticity Reporter: assembles the verdict surface returned to the
//! caller after each GOP settles.

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Per-GOP authenticity verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Authenticity {
    Ok,
    OkWithMissingInfo,
    NotOk,
    /// No SEI has ever been seen after at least one completed GOP.
    NotSigned,
    /// A public key arrived but no GOP has completed yet.
    SignaturePresent,
}

/// Product/device identity, filled from the most recently decoded
/// `PRODUCT_INFO` TLV.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductInfo {
    pub hardware_id: String,
    pub firmware_version: String,
    pub serial_number: String,
    pub manufacturer: String,
    pub address: String,
}

impl ProductInfo {
    /// `PRODUCT_INFO` TLV value: five 1-byte-length-prefixed UTF-8 strings,
    /// in field-declaration order.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for field in [
            &self.hardware_id,
            &self.firmware_version,
            &self.serial_number,
            &self.manufacturer,
            &self.address,
        ] {
            out.push(field.len() as u8);
            out.extend_from_slice(field.as_bytes());
        }
        out
    }

    pub fn decode(data: &[u8]) -> Result<Self, Error> {
        let mut i = 0usize;
        let mut fields = Vec::with_capacity(5);
        for _ in 0..5 {
            let len = *data
                .get(i)
                .ok_or_else(|| Error::DecodingError("PRODUCT_INFO: missing field length".to_string()))?
                as usize;
            i += 1;
            let bytes = data
                .get(i..i + len)
                .ok_or_else(|| Error::DecodingError("PRODUCT_INFO: field truncated".to_string()))?;
            fields.push(
                String::from_utf8(bytes.to_vec())
                    .map_err(|e| Error::DecodingError(format!("PRODUCT_INFO: field not utf8: {e}")))?,
            );
            i += len;
        }
        Ok(ProductInfo {
            hardware_id: fields[0].clone(),
            firmware_version: fields[1].clone(),
            serial_number: fields[2].clone(),
            manufacturer: fields[3].clone(),
            address: fields[4].clone(),
        })
    }
}

/// The verdict for exactly one settled GOP.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LatestValidation {
    pub authenticity: Authenticity,
    pub public_key_has_changed: bool,
    pub number_of_expected_picture_nalus: u64,
    pub number_of_received_picture_nalus: u64,
    pub number_of_pending_picture_nalus: u64,
    pub list_of_missing_nalus: Vec<usize>,
    pub list_of_invalid_nalus: Vec<usize>,
    /// Signed and unclamped: negative means more NALUs arrived than the
    /// SEI declared.
    pub missed_nalus: i64,
    /// Per-item verdict trail, single-character alphabet `{P,U,_,.,N,M,E}`.
    pub validation_str: String,
}

/// Monotone counters over the whole session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AccumulatedValidation {
    pub ok_count: u64,
    pub ok_with_missing_info_count: u64,
    pub not_ok_count: u64,
    pub not_signed_count: u64,
    pub signature_present_count: u64,
    pub number_of_received_picture_nalus: u64,
    pub number_of_validated_picture_nalus: u64,
    pub number_of_missed_picture_nalus: u64,
    pub public_key_changes: u64,
}

impl AccumulatedValidation {
    pub fn add_latest(&mut self, latest: &LatestValidation) {
        match latest.authenticity {
            Authenticity::Ok => self.ok_count += 1,
            Authenticity::OkWithMissingInfo => self.ok_with_missing_info_count += 1,
            Authenticity::NotOk => self.not_ok_count += 1,
            Authenticity::NotSigned => self.not_signed_count += 1,
            Authenticity::SignaturePresent => self.signature_present_count += 1,
        }
        self.number_of_received_picture_nalus += latest.number_of_received_picture_nalus;
        self.number_of_validated_picture_nalus += latest
            .number_of_received_picture_nalus
            .saturating_sub(latest.list_of_invalid_nalus.len() as u64);
        if latest.missed_nalus > 0 {
            self.number_of_missed_picture_nalus += latest.missed_nalus as u64;
        }
        if latest.public_key_has_changed {
            self.public_key_changes += 1;
        }
    }
}

/// Full boundary value returned from `add_nalu_and_authenticate` whenever a
/// GOP settles.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthenticityReport {
    pub latest_validation: LatestValidation,
    pub accumulated_validation: AccumulatedValidation,
    pub product_info: Option<ProductInfo>,
    pub version_on_signing_side: Option<String>,
    pub this_version: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_latest(authenticity: Authenticity, missed: i64) -> LatestValidation {
        LatestValidation {
            authenticity,
            public_key_has_changed: false,
            number_of_expected_picture_nalus: 3,
            number_of_received_picture_nalus: 3,
            number_of_pending_picture_nalus: 0,
            list_of_missing_nalus: Vec::new(),
            list_of_invalid_nalus: Vec::new(),
            missed_nalus: missed,
            validation_str: "...".to_string(),
        }
    }

    #[test]
    fn accumulated_counts_match_sum_of_latest() {
        let mut acc = AccumulatedValidation::default();
        acc.add_latest(&sample_latest(Authenticity::Ok, 0));
        acc.add_latest(&sample_latest(Authenticity::NotOk, 1));
        assert_eq!(acc.ok_count, 1);
        assert_eq!(acc.not_ok_count, 1);
        assert_eq!(acc.number_of_missed_picture_nalus, 1);
    }

    #[test]
    fn negative_missed_nalus_not_accumulated_as_missed() {
        let mut acc = AccumulatedValidation::default();
        acc.add_latest(&sample_latest(Authenticity::Ok, -2));
        assert_eq!(acc.number_of_missed_picture_nalus, 0);
    }

    #[test]
    fn report_serializes_to_json() {
        let report = AuthenticityReport {
            latest_validation: sample_latest(Authenticity::Ok, 0),
            accumulated_validation: AccumulatedValidation::default(),
            product_info: None,
            version_on_signing_side: None,
            this_version: "0.1.0".to_string(),
        };
        let json = serde_json::to_string(&report).unwrap();
        assert!(json.contains("\"authenticity\":\"OK\""));
    }

    #[test]
    fn product_info_round_trips() {
        let info = ProductInfo {
            hardware_id: "hw-1".to_string(),
            firmware_version: "3.1.4".to_string(),
            serial_number: "SN-001".to_string(),
            manufacturer: "Acme".to_string(),
            address: "".to_string(),
        };
        let decoded = ProductInfo::decode(&info.encode()).unwrap();
        assert_eq!(decoded, info);
    }
}
