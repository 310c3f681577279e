//! Fixed textual timestamp layout shared by the wide and spot-price tables.

use chrono::NaiveDateTime;

/// Output layout, e.g. `05Jan2021:14:30:00`.
pub const SPOT_DATE_FORMAT: &str = "%d%b%Y:%H:%M:%S";

/// Formats a timestamp in the output layout.
pub fn format_spot(ts: NaiveDateTime) -> String {
    ts.format(SPOT_DATE_FORMAT).to_string()
}

/// Parses the output layout; the month abbreviation is case-insensitive.
pub fn parse_spot(raw: &str) -> Result<NaiveDateTime, chrono::ParseError> {
    NaiveDateTime::parse_from_str(raw.trim(), SPOT_DATE_FORMAT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn layout_matches_example() {
        let ts = NaiveDate::from_ymd_opt(2021, 1, 5)
            .unwrap()
            .and_hms_opt(14, 30, 0)
            .unwrap();
        assert_eq!(format_spot(ts), "05Jan2021:14:30:00");
        assert_eq!(parse_spot("05JAN2021:14:30:00").unwrap(), ts);
    }
}
