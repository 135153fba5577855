// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

//! Conversion between ASN.1 DER `Ecdsa-Sig-Value` and the fixed-width
//! `R || S` encoding JWS uses for ES256/ES384/ES512.

use der::asn1::UintRef;
use der::{Decode, Encode, Sequence};

use crate::algorithm::EcCurve;
use crate::errors::{Result, SignerError};

#[derive(Sequence)]
struct EcdsaSigValue<'a> {
    r: UintRef<'a>,
    s: UintRef<'a>,
}

fn align_coordinate(value: &[u8], width: usize) -> Result<Vec<u8>> {
    // UintRef strips leading zeros, so anything longer is not a valid scalar
    if value.len() > width {
        return Err(SignerError::InvalidSignature(format!(
            "coordinate of {} bytes exceeds {} bytes",
            value.len(),
            width
        )));
    }
    let mut aligned = vec![0u8; width - value.len()];
    aligned.extend_from_slice(value);
    Ok(aligned)
}

pub fn der_to_raw(signature: &[u8], curve: EcCurve) -> Result<Vec<u8>> {
    let sig = EcdsaSigValue::from_der(signature)?;
    let width = curve.coordinate_len();
    let mut raw = align_coordinate(sig.r.as_bytes(), width)?;
    raw.extend(align_coordinate(sig.s.as_bytes(), width)?);
    Ok(raw)
}

pub fn raw_to_der(signature: &[u8], curve: EcCurve) -> Result<Vec<u8>> {
    let width = curve.coordinate_len();
    if signature.len() != width * 2 {
        return Err(SignerError::InvalidSignature(format!(
            "raw {} signature must be {} bytes, got {}",
            curve.name(),
            width * 2,
            signature.len()
        )));
    }
    let (r, s) = signature.split_at(width);
    let value = EcdsaSigValue {
        r: UintRef::new(r)?,
        s: UintRef::new(s)?,
    };
    Ok(value.to_der()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    // SEQUENCE { INTEGER 0x00ff.., INTEGER 0x01 } with a sign-padding byte on r
    fn sample_der() -> Vec<u8> {
        let mut der = vec![0x30, 0x26, 0x02, 0x21, 0x00];
        der.extend([0xffu8; 32]);
        der.extend([0x02, 0x01, 0x01]);
        der
    }

    #[test]
    fn test_der_to_raw_pads_and_strips() {
        let raw = der_to_raw(&sample_der(), EcCurve::P256).unwrap();
        assert_eq!(raw.len(), 64);
        assert_eq!(&raw[..32], &[0xffu8; 32]);
        assert_eq!(&raw[32..63], &[0u8; 31]);
        assert_eq!(raw[63], 1);
    }

    #[test]
    fn test_raw_to_der_round_trip() {
        let raw = der_to_raw(&sample_der(), EcCurve::P256).unwrap();
        let der = raw_to_der(&raw, EcCurve::P256).unwrap();
        assert_eq!(der, sample_der());
    }

    #[test]
    fn test_p521_width() {
        let raw = der_to_raw(&sample_der(), EcCurve::P521).unwrap();
        assert_eq!(raw.len(), 132);
    }

    #[test]
    fn test_rejects_oversized_coordinate() {
        assert!(der_to_raw(&sample_der(), EcCurve::P256).is_ok());
        let mut der = vec![0x30, 0x26, 0x02, 0x21, 0x01];
        der.extend([0xffu8; 32]);
        der.extend([0x02, 0x01, 0x01]);
        assert!(matches!(
            der_to_raw(&der, EcCurve::P256),
            Err(SignerError::InvalidSignature(_))
        ));
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(der_to_raw(b"not der", EcCurve::P384).is_err());
        assert!(raw_to_der(&[1u8; 10], EcCurve::P384).is_err());
    }
}
