//! # Packet Construction
//!
//! Everything needed to turn per-channel sample bytes into the JSON packet
//! published for downstream stages (voice activity, direction of arrival,
//! beamforming).
//!
//! - **codec**: base64 text encoding of raw bytes
//! - **identifier**: content-addressed packet ids derived from timestamps
//! - **envelope**: the packet schema and its builder

pub mod codec;
pub mod envelope;
pub mod identifier;
