use std::time::Duration;

/// Parse une durée UPnP `H+:MM:SS[.F+]`.
///
/// `NOT_IMPLEMENTED` et les valeurs vides donnent `None`.
pub fn parse_upnp_time(raw: &str) -> Option<Duration> {
    let raw = raw.trim();
    if raw.is_empty() || raw.eq_ignore_ascii_case("NOT_IMPLEMENTED") {
        return None;
    }

    let mut parts = raw.split(':');
    let hours: u64 = parts.next()?.trim_start_matches('+').parse().ok()?;
    let minutes: u64 = parts.next()?.parse().ok()?;
    let seconds_part = parts.next()?;
    if parts.next().is_some() || minutes >= 60 {
        return None;
    }

    let (secs, frac) = match seconds_part.split_once('.') {
        Some((s, f)) => (s, Some(f)),
        None => (seconds_part, None),
    };
    let secs: u64 = secs.parse().ok()?;
    if secs >= 60 {
        return None;
    }

    // valeur fournie par le renderer : débordement = valeur invalide
    let total = hours
        .checked_mul(3600)?
        .checked_add(minutes * 60 + secs)?;
    let mut duration = Duration::from_secs(total);
    if let Some(frac) = frac.filter(|f| !f.is_empty()) {
        // fraction décimale ou F0/F1 : seule la forme décimale est retenue
        if let Some(millis) = frac
            .get(..frac.len().min(3))
            .and_then(|digits| digits.parse::<u64>().ok())
        {
            let scale = 10u64.pow(3 - frac.len().min(3) as u32);
            duration += Duration::from_millis(millis * scale);
        }
    }
    Some(duration)
}

/// Formate une durée en `HH:MM:SS` pour `Seek`
pub fn format_upnp_time(duration: Duration) -> String {
    let total = duration.as_secs();
    format!(
        "{:02}:{:02}:{:02}",
        total / 3600,
        (total % 3600) / 60,
        total % 60
    )
}
