use anyhow::anyhow;
use chrono::{
  DateTime,
  Days,
  NaiveDate,
  Offset,
  SecondsFormat,
  TimeDelta,
  TimeZone,
  Utc
};
use chrono_tz::Tz;

/// Longest stretch searched backwards for
/// the offset in force before a skipped
/// midnight.
const GAP_SEARCH_HOURS: i64 = 48;

pub const DEFAULT_TIMEZONE: &str =
  "UTC";

pub fn parse_timezone(
  raw: &str,
  source: &str
) -> Option<Tz> {
  let trimmed = raw.trim();
  if trimmed.is_empty() {
    return None;
  }

  match trimmed.parse::<Tz>() {
    | Ok(tz) => Some(tz),
    | Err(err) => {
      tracing::warn!(
        source,
        timezone = trimmed,
        error = %err,
        "invalid timezone"
      );
      None
    }
  }
}

/// Midnight of the local calendar day
/// containing `now`, expressed in UTC.
#[must_use]
pub fn start_of_day(
  now: DateTime<Utc>,
  tz: &Tz
) -> DateTime<Utc> {
  let date = now
    .with_timezone(tz)
    .date_naive();
  local_midnight(date, tz)
}

/// `[start of today, start of today +
/// days)` in the local timezone.
#[must_use]
pub fn window_from_today(
  now: DateTime<Utc>,
  tz: &Tz,
  days: u64
) -> (DateTime<Utc>, DateTime<Utc>) {
  let today = now
    .with_timezone(tz)
    .date_naive();
  let end_date = today
    .checked_add_days(Days::new(days))
    .unwrap_or(today);
  (
    local_midnight(today, tz),
    local_midnight(end_date, tz)
  )
}

#[must_use]
pub fn today_window(
  now: DateTime<Utc>,
  tz: &Tz
) -> (DateTime<Utc>, DateTime<Utc>) {
  window_from_today(now, tz, 1)
}

fn local_midnight(
  date: NaiveDate,
  tz: &Tz
) -> DateTime<Utc> {
  let naive = date
    .and_hms_opt(0, 0, 0)
    .unwrap_or_default();
  if let Some(dt) = tz
    .from_local_datetime(&naive)
    .earliest()
  {
    return dt.with_timezone(&Utc);
  }

  // Midnight skipped by a DST jump: the
  // day starts where the gap ends, which
  // is midnight read with the offset in
  // force just before it.
  let before = (1..=GAP_SEARCH_HOURS)
    .filter_map(|hours| {
      naive.checked_sub_signed(
        TimeDelta::hours(hours)
      )
    })
    .find_map(|earlier| {
      tz.from_local_datetime(&earlier)
        .earliest()
    })
    .map(|dt| {
      dt.offset().fix().local_minus_utc()
    })
    .unwrap_or(0);
  let utc = naive
    .checked_sub_signed(
      TimeDelta::seconds(i64::from(
        before
      ))
    )
    .unwrap_or(naive);
  Utc.from_utc_datetime(&utc)
}

/// Stored timestamps are RFC 3339; a
/// bare `YYYY-MM-DD` is read as UTC
/// midnight.
pub fn parse_stored_timestamp(
  raw: &str
) -> anyhow::Result<DateTime<Utc>> {
  let trimmed = raw.trim();
  if let Ok(dt) =
    DateTime::parse_from_rfc3339(trimmed)
  {
    return Ok(dt.with_timezone(&Utc));
  }
  NaiveDate::parse_from_str(
    trimmed, "%Y-%m-%d"
  )
  .ok()
  .and_then(|date| date.and_hms_opt(0, 0, 0))
  .map(|naive| naive.and_utc())
  .ok_or_else(|| {
    anyhow!("invalid timestamp '{trimmed}'")
  })
}

#[must_use]
pub fn format_timestamp(
  dt: DateTime<Utc>
) -> String {
  dt.to_rfc3339_opts(
    SecondsFormat::Millis,
    true
  )
}

#[must_use]
pub fn format_local_date(
  dt: DateTime<Utc>,
  tz: &Tz
) -> String {
  dt.with_timezone(tz)
    .format("%Y-%m-%d")
    .to_string()
}

/// Accepts `today`, `tomorrow`,
/// `YYYY-MM-DD` (local midnight) or a
/// full RFC 3339 timestamp.
pub fn parse_due(
  input: &str,
  now: DateTime<Utc>,
  tz: &Tz
) -> anyhow::Result<DateTime<Utc>> {
  let trimmed = input.trim();
  match trimmed
    .to_ascii_lowercase()
    .as_str()
  {
    | "today" => {
      return Ok(start_of_day(now, tz));
    }
    | "tomorrow" => {
      return Ok(
        window_from_today(now, tz, 1).1
      );
    }
    | _ => {}
  }

  if let Ok(date) =
    NaiveDate::parse_from_str(
      trimmed, "%Y-%m-%d"
    )
  {
    return Ok(local_midnight(date, tz));
  }

  DateTime::parse_from_rfc3339(trimmed)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|err| {
      anyhow!(
        "invalid date '{trimmed}': \
         {err}"
      )
    })
}

pub mod iso_timestamp_serde {
  use chrono::{
    DateTime,
    Utc
  };
  use serde::{
    Deserialize,
    Deserializer,
    Serializer
  };

  pub fn serialize<S>(
    dt: &DateTime<Utc>,
    serializer: S
  ) -> Result<S::Ok, S::Error>
  where
    S: Serializer
  {
    serializer.serialize_str(
      &super::format_timestamp(*dt)
    )
  }

  pub fn deserialize<'de, D>(
    deserializer: D
  ) -> Result<DateTime<Utc>, D::Error>
  where
    D: Deserializer<'de>
  {
    let raw = String::deserialize(
      deserializer
    )?;
    super::parse_stored_timestamp(&raw)
      .map_err(serde::de::Error::custom)
  }

  pub mod option {
    use chrono::{
      DateTime,
      Utc
    };
    use serde::{
      Deserialize,
      Deserializer,
      Serializer
    };

    pub fn serialize<S>(
      dt: &Option<DateTime<Utc>>,
      serializer: S
    ) -> Result<S::Ok, S::Error>
    where
      S: Serializer
    {
      match dt {
        | Some(value) => serializer
          .serialize_str(
            &super::super::format_timestamp(
              *value
            )
          ),
        | None => {
          serializer.serialize_none()
        }
      }
    }

    pub fn deserialize<'de, D>(
      deserializer: D
    ) -> Result<
      Option<DateTime<Utc>>,
      D::Error
    >
    where
      D: Deserializer<'de>
    {
      let raw =
        Option::<String>::deserialize(
          deserializer
        )?;
      match raw {
        | Some(text)
          if !text.trim().is_empty() =>
        {
          super::super::parse_stored_timestamp(
            &text
          )
          .map(Some)
          .map_err(
            serde::de::Error::custom
          )
        }
        | _ => Ok(None)
      }
    }
  }
}
