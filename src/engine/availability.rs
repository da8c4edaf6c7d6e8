use crate::model::*;

// ── Availability Algorithm ────────────────────────────────────────

/// Free units for `window`: capacity minus the summed quantity of every
/// active reservation overlapping it.
///
/// The sum is taken over all overlapping reservations, not the per-instant
/// peak, so two back-to-back reservations inside the window both count.
pub fn available_quantity(resource: &ResourceState, window: &Span) -> u32 {
    let committed: u64 = resource
        .active_overlapping(window)
        .map(|r| u64::from(r.quantity))
        .sum();
    u64::from(resource.capacity)
        .saturating_sub(committed)
        .try_into()
        .unwrap_or(0)
}

/// Partition `range` into maximal sub-windows of constant free capacity.
pub fn free_windows(resource: &ResourceState, range: &Span) -> Vec<FreeWindow> {
    let capacity = u64::from(resource.capacity);
    let mut windows: Vec<FreeWindow> = Vec::new();
    for (span, load) in usage_profile(resource, range) {
        let free = capacity.saturating_sub(load).min(u64::from(u32::MAX)) as u32;
        if let Some(last) = windows.last_mut()
            && last.free == free
            && last.span.end == span.start
        {
            last.span.end = span.end;
            continue;
        }
        windows.push(FreeWindow { span, free });
    }
    windows
}

/// Highest concurrently-active quantity anywhere in `range`.
pub fn peak_usage(resource: &ResourceState, range: &Span) -> u32 {
    usage_profile(resource, range)
        .into_iter()
        .map(|(_, load)| load)
        .max()
        .unwrap_or(0)
        .min(u64::from(u32::MAX)) as u32
}

/// Sweep line over active reservations clamped to `range`. Returns contiguous
/// segments covering the whole range, each with the committed quantity.
fn usage_profile(resource: &ResourceState, range: &Span) -> Vec<(Span, u64)> {
    let mut events: Vec<(Ms, i64)> = Vec::new();
    for r in resource.active_overlapping(range) {
        if let Some(clamped) = r.window.clamp_to(range) {
            events.push((clamped.start, i64::from(r.quantity)));
            events.push((clamped.end, -i64::from(r.quantity)));
        }
    }
    events.sort_by_key(|e| e.0);

    let mut profile: Vec<(Span, u64)> = Vec::new();
    let mut push = |span: Span, load: i64| {
        let load = load.max(0) as u64;
        if let Some(last) = profile.last_mut()
            && last.1 == load
        {
            last.0.end = span.end;
            return;
        }
        profile.push((span, load));
    };

    let mut cursor = range.start;
    let mut load: i64 = 0;
    let mut i = 0;
    while i < events.len() {
        let t = events[i].0;
        if t > cursor {
            push(Span::new(cursor, t), load);
            cursor = t;
        }
        while i < events.len() && events[i].0 == t {
            load += events[i].1;
            i += 1;
        }
    }
    if cursor < range.end {
        push(Span::new(cursor, range.end), load);
    }
    profile
}
