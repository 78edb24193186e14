//! Artifact file names: `<uuid-v4>_<YYYY-MM-DD-HH-MM-SS>.jpg` in local time.

use chrono::{DateTime, Local, TimeZone};
use uuid::Uuid;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d-%H-%M-%S";

pub fn artifact_name() -> String {
    artifact_name_at(Uuid::new_v4(), &Local::now())
}

pub fn artifact_name_at<Tz: TimeZone>(id: Uuid, at: &DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    format!("{}_{}.jpg", id.hyphenated(), at.format(TIMESTAMP_FORMAT))
}
