use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 秒 + 纳秒形式的时间戳，和 inode 记录中的布局一致
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp {
    pub sec: u64,
    pub nsec: u32,
}

impl Timestamp {
    pub fn to_datetime(self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.sec as i64, self.nsec)
    }
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(t: DateTime<Utc>) -> Self {
        Self {
            sec: t.timestamp().max(0) as u64,
            nsec: t.timestamp_subsec_nanos(),
        }
    }
}

pub fn current_timestamp() -> Timestamp {
    Utc::now().into()
}

/// 生成一个随机唯一 ID
pub fn generate_uuid() -> Uuid {
    Uuid::new_v4()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamps_order_by_seconds_then_nanos() {
        let a = Timestamp { sec: 1, nsec: 900 };
        let b = Timestamp { sec: 2, nsec: 0 };
        let c = Timestamp { sec: 2, nsec: 1 };
        assert!(a < b && b < c);
    }

    #[test]
    fn chrono_round_trip() {
        let now = Utc::now();
        let ts = Timestamp::from(now);
        assert_eq!(ts.to_datetime(), Some(now));
    }
}
