use chrono::format::{DelayedFormat, StrftimeItems};

/// Gets the time in a pretty format. Ideal for logging.
///
/// # Returns
/// The formatted time, e.g. `02/05 11:23:15 PM`
#[inline]
pub fn get_pretty_time() -> DelayedFormat<StrftimeItems<'static>> {
    let time = chrono::offset::Local::now();
    time.format("%m/%d %I:%M:%S %p")
}

/// Returns the number of non-leap-milliseconds since January 1, 1970 UTC, formatted as a decimal
/// string. This is the `timer`/`timex` nonce the upstream expects on every form POST.
///
/// # Returns
/// The current epoch time in milliseconds, as a decimal string.
#[inline]
pub fn mint_timer() -> String {
    chrono::offset::Utc::now().timestamp_millis().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timer_is_monotonic_non_decreasing() {
        let t1: i64 = mint_timer().parse().unwrap();
        let t2: i64 = mint_timer().parse().unwrap();
        assert!(t2 >= t1);
    }
}
