use serde::{Deserialize, Serialize};
use std::io::{Seek, SeekFrom, Write};
use std::time::{SystemTime, UNIX_EPOCH};

/// Size of one encoded service record.
pub const RECORD_LEN: usize = 20;

/// TAI64 label of the unix epoch (2^62 + 10 leap seconds).
const TAI64_UNIX_EPOCH: u64 = 4_611_686_018_427_387_914;

/// Observable phase of a service slot, as published in byte 18 of the record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SvStatus {
    Stopped,
    Starting,
    Started,
    Running,
    Stopping,
    Failed,
    Orphaned,
}

impl SvStatus {
    pub fn code(self) -> u8 {
        match self {
            SvStatus::Stopped => 0,
            SvStatus::Starting => 1,
            SvStatus::Started => 2,
            SvStatus::Running => 3,
            SvStatus::Stopping => 4,
            SvStatus::Failed => 5,
            SvStatus::Orphaned => 6,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            0 => SvStatus::Stopped,
            1 => SvStatus::Starting,
            2 => SvStatus::Started,
            3 => SvStatus::Running,
            4 => SvStatus::Stopping,
            5 => SvStatus::Failed,
            6 => SvStatus::Orphaned,
            _ => return None,
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SvStatus::Stopped => "stopped",
            SvStatus::Starting => "starting",
            SvStatus::Started => "started",
            SvStatus::Running => "running",
            SvStatus::Stopping => "stopping",
            SvStatus::Failed => "failed",
            SvStatus::Orphaned => "orphanage",
        }
    }
}

impl std::fmt::Display for SvStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Wall-clock instant packed as an external TAI64N label.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp {
    /// TAI64 seconds label.
    pub tai_secs: u64,
    pub nanos: u32,
}

impl Timestamp {
    pub fn now() -> Self {
        let d = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Self::from_unix(d.as_secs() as i64, d.subsec_nanos())
    }

    pub fn from_unix(secs: i64, nanos: u32) -> Self {
        Self {
            tai_secs: TAI64_UNIX_EPOCH.wrapping_add_signed(secs),
            nanos,
        }
    }

    pub fn unix_secs(&self) -> i64 {
        self.tai_secs.wrapping_sub(TAI64_UNIX_EPOCH) as i64
    }

    pub fn pack(&self) -> [u8; 12] {
        let mut out = [0u8; 12];
        out[..8].copy_from_slice(&self.tai_secs.to_be_bytes());
        out[8..].copy_from_slice(&self.nanos.to_be_bytes());
        out
    }

    pub fn unpack(b: &[u8; 12]) -> Self {
        let mut secs = [0u8; 8];
        let mut nanos = [0u8; 4];
        secs.copy_from_slice(&b[..8]);
        nanos.copy_from_slice(&b[8..]);
        Self {
            tai_secs: u64::from_be_bytes(secs),
            nanos: u32::from_be_bytes(nanos),
        }
    }
}

/// Desired direction marker (byte 17).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Want {
    Up,
    Down,
}

/// Decoded view of one 20-byte record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusRecord {
    pub since: Timestamp,
    /// 0 when no process is attributed to the slot.
    pub pid: u32,
    pub paused: bool,
    pub want: Option<Want>,
    pub status: SvStatus,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("status must be 20 or 40 bytes, got {0}")]
    Length(usize),
    #[error("unknown status code {0}")]
    StatusCode(u8),
    #[error("unknown want marker {0:#04x}")]
    Want(u8),
}

impl StatusRecord {
    pub fn encode(&self) -> [u8; RECORD_LEN] {
        let mut out = [0u8; RECORD_LEN];
        out[..12].copy_from_slice(&self.since.pack());
        out[12..16].copy_from_slice(&self.pid.to_le_bytes());
        out[16] = u8::from(self.pid != 0 && self.paused);
        out[17] = match self.want {
            Some(Want::Up) => b'u',
            Some(Want::Down) => b'd',
            None => 0,
        };
        out[18] = self.status.code();
        out[19] = 0;
        out
    }

    pub fn decode(b: &[u8]) -> Result<Self, DecodeError> {
        if b.len() != RECORD_LEN {
            return Err(DecodeError::Length(b.len()));
        }
        let mut ts = [0u8; 12];
        ts.copy_from_slice(&b[..12]);
        let mut pid = [0u8; 4];
        pid.copy_from_slice(&b[12..16]);
        let want = match b[17] {
            b'u' => Some(Want::Up),
            b'd' => Some(Want::Down),
            0 => None,
            other => return Err(DecodeError::Want(other)),
        };
        Ok(Self {
            since: Timestamp::unpack(&ts),
            pid: u32::from_le_bytes(pid),
            paused: b[16] != 0,
            want,
            status: SvStatus::from_code(b[18]).ok_or(DecodeError::StatusCode(b[18]))?,
        })
    }
}

/// Decode a whole status file: one record (main) or two (main, log).
pub fn decode_file(b: &[u8]) -> Result<Vec<StatusRecord>, DecodeError> {
    if b.len() != RECORD_LEN && b.len() != RECORD_LEN * 2 {
        return Err(DecodeError::Length(b.len()));
    }
    b.chunks(RECORD_LEN).map(StatusRecord::decode).collect()
}

/// Anything the status snapshot can be rewritten into from offset zero.
pub trait StatusSink: Write + Seek {}

impl<T: Write + Seek> StatusSink for T {}

/// Rewrite the snapshot in place. Failures are logged and otherwise ignored; the
/// next successful publish replaces the stale snapshot.
pub fn publish(out: &mut dyn StatusSink, records: &[StatusRecord]) {
    let mut buf = Vec::with_capacity(RECORD_LEN * records.len());
    for r in records {
        buf.extend_from_slice(&r.encode());
    }
    if let Err(e) = out.seek(SeekFrom::Start(0)) {
        tracing::warn!(err = %e, "unable to seek in status");
        return;
    }
    match out.write(&buf) {
        Ok(n) if n == buf.len() => {}
        Ok(n) => tracing::warn!(written = n, wanted = buf.len(), "unable to write status: partial write"),
        Err(e) => tracing::warn!(err = %e, "unable to write status"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn record(pid: u32, status: SvStatus, paused: bool, want: Option<Want>) -> StatusRecord {
        StatusRecord {
            since: Timestamp::from_unix(1_700_000_000, 123_456_789),
            pid,
            paused,
            want,
            status,
        }
    }

    #[test]
    fn layout_matches_wire_format() {
        let b = record(0x0102_0304, SvStatus::Running, true, Some(Want::Up)).encode();
        assert_eq!(&b[..8], &(TAI64_UNIX_EPOCH + 1_700_000_000).to_be_bytes());
        assert_eq!(&b[8..12], &123_456_789u32.to_be_bytes());
        assert_eq!(&b[12..16], &[0x04, 0x03, 0x02, 0x01]);
        assert_eq!(b[16], 1);
        assert_eq!(b[17], b'u');
        assert_eq!(b[18], 3);
        assert_eq!(b[19], 0);
    }

    #[test]
    fn paused_is_only_reported_with_a_pid() {
        let b = record(0, SvStatus::Stopped, true, Some(Want::Down)).encode();
        assert_eq!(b[16], 0);
        assert_eq!(b[17], b'd');
    }

    #[test]
    fn decode_recovers_fields() {
        let cases = [
            record(42, SvStatus::Starting, false, None),
            record(7, SvStatus::Stopping, true, Some(Want::Down)),
            record(u32::MAX, SvStatus::Orphaned, true, Some(Want::Up)),
            record(0, SvStatus::Failed, false, Some(Want::Up)),
        ];
        for r in cases {
            assert_eq!(StatusRecord::decode(&r.encode()).unwrap(), r);
        }
    }

    #[test]
    fn decode_rejects_bad_input() {
        assert_eq!(StatusRecord::decode(&[0u8; 19]), Err(DecodeError::Length(19)));
        let mut b = record(1, SvStatus::Running, false, None).encode();
        b[18] = 9;
        assert_eq!(StatusRecord::decode(&b), Err(DecodeError::StatusCode(9)));
        b[18] = 3;
        b[17] = b'x';
        assert_eq!(StatusRecord::decode(&b), Err(DecodeError::Want(b'x')));
        assert!(decode_file(&[0u8; 30]).is_err());
    }

    #[test]
    fn publish_overwrites_from_offset_zero() {
        let mut out = Cursor::new(Vec::new());
        let main = record(10, SvStatus::Running, false, Some(Want::Up));
        let log = record(11, SvStatus::Running, false, Some(Want::Up));
        publish(&mut out, &[main.clone(), log.clone()]);
        assert_eq!(out.get_ref().len(), 40);

        let main2 = record(0, SvStatus::Stopped, false, Some(Want::Down));
        publish(&mut out, &[main2.clone(), log.clone()]);
        let decoded = decode_file(out.get_ref()).unwrap();
        assert_eq!(decoded, vec![main2, log]);
    }

    #[test]
    fn timestamp_unix_round_trip() {
        let t = Timestamp::from_unix(1_234_567, 5);
        assert_eq!(t.unix_secs(), 1_234_567);
        assert_eq!(Timestamp::unpack(&t.pack()), t);
        assert!(Timestamp::now().unix_secs() > 1_600_000_000);
    }
}
