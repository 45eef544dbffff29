use sysinfo::{ProcessesToUpdate, System};

/// Normalize a string by removing zero-width and special Unicode whitespace characters and lowercasing it.
pub fn normalize(s: &str) -> String {
    s.chars()
        .filter(|c| {
            !matches!(
                *c,
                '\u{200B}' | // zero-width space
                '\u{200C}' | // zero-width non-joiner
                '\u{200D}' | // zero-width joiner
                '\u{00A0}' | // non-breaking space
                '\u{FEFF}' // zero-width no-break space
            )
        })
        .collect::<String>()
        .trim()
        .to_lowercase()
}

/// Compare two captions with accelerator markers removed and both sides
/// normalized; `exact == false` is a substring test.
pub fn text_matches(actual: &str, expected: &str, exact: bool) -> bool {
    let actual = normalize(&strip_accelerator(actual));
    let expected = normalize(&strip_accelerator(expected));
    if exact {
        actual == expected
    } else {
        actual.contains(&expected)
    }
}

/// Drops VCL accelerator markers: "&Save" -> "Save", "&&" -> "&".
pub fn strip_accelerator(caption: &str) -> String {
    let mut out = String::with_capacity(caption.len());
    let mut chars = caption.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '&' {
            if chars.peek() == Some(&'&') {
                out.push('&');
                chars.next();
            }
            continue;
        }
        out.push(c);
    }
    out
}

/// Truncate to at most `max` characters without splitting a code point.
pub fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}

/// PIDs of every process whose name contains `process_name` (case-insensitive),
/// in ascending order.
pub fn find_pids_for_process(process_name: &str) -> Vec<u32> {
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::All, true);

    let needle = process_name.to_lowercase();
    let mut pids: Vec<u32> = system
        .processes()
        .iter()
        .filter(|(_, p)| {
            p.name()
                .to_string_lossy()
                .to_lowercase()
                .contains(&needle)
        })
        .map(|(pid, _)| pid.as_u32())
        .collect();
    pids.sort_unstable();
    pids
}
