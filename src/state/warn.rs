fn sanitize_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut prev_sep = false;
    for ch in value.chars() {
        if ch.is_ascii_whitespace() {
            if !out.is_empty() && !prev_sep {
                out.push('_');
                prev_sep = true;
            }
        } else if ch.is_ascii_graphic() {
            out.push(ch);
            prev_sep = false;
        }
    }
    let trimmed = out.trim_matches('_');
    if trimmed.is_empty() {
        "na".to_string()
    } else {
        trimmed.to_string()
    }
}

/// One operator-facing line on stderr for a failure that was absorbed.
#[derive(Debug, Clone, Copy)]
pub struct WarnEvent<'a> {
    pub code: &'a str,
    pub component: &'a str,
    pub action: &'a str,
    pub path: &'a str,
    pub fallback: &'a str,
    pub err: &'a str,
}

pub fn emit(event: WarnEvent<'_>) {
    eprintln!("{}", render(event));
}

fn render(event: WarnEvent<'_>) -> String {
    format!(
        "WAYPOINT_WARN code={} component={} action={} path={} fallback={} err={}",
        sanitize_value(event.code),
        sanitize_value(event.component),
        sanitize_value(event.action),
        sanitize_value(event.path),
        sanitize_value(event.fallback),
        sanitize_value(event.err),
    )
}
