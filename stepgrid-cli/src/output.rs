// Terminal output for the CLI
// Progress and diagnostics go to stderr; only step stdout goes to stdout

const RESET: &str = "\x1b[0m";
const BOLD_CYAN: &str = "\x1b[1;36m";
const BOLD_GREEN: &str = "\x1b[1;32m";
const BOLD_RED: &str = "\x1b[1;31m";
const BOLD_BLUE: &str = "\x1b[1;34m";
const BOLD: &str = "\x1b[1m";
const GREEN: &str = "\x1b[32m";
const RED: &str = "\x1b[31m";
const YELLOW: &str = "\x1b[33m";
const DIM: &str = "\x1b[2m";

fn paint(style: &str, text: &str) -> String {
    format!("{style}{text}{RESET}")
}

/// Right-aligned action verb, cargo style: `   Parsing ci.yml`
pub fn status(action: &str, message: &str) {
    eprintln!("{} {}", paint(BOLD_CYAN, &format!("{:>12}", action)), message);
}

pub fn success(message: &str) {
    eprintln!("{} {}", paint(BOLD_GREEN, "  \u{2713}"), message);
}

pub fn failure(message: &str) {
    eprintln!("{} {}", paint(BOLD_RED, "  \u{2717}"), message);
}

/// A passed validation check
pub fn check(message: &str) {
    eprintln!("{} {}", paint(GREEN, "  \u{2713}"), message);
}

pub fn warning(message: &str) {
    eprintln!("{} {}", paint(YELLOW, "  !"), message);
}

pub fn error(message: &str) {
    eprintln!("{} {}", paint(BOLD_RED, "error:"), message);
}

pub fn dim(message: &str) {
    eprintln!("{}", paint(DIM, message));
}

pub fn dim_success(message: &str) {
    eprintln!("{}", paint(GREEN, message));
}

pub fn dim_failure(message: &str) {
    eprintln!("{}", paint(RED, message));
}

pub fn run_header(job_id: &str, total_jobs: usize, fail_fast: bool) {
    let policy = if fail_fast { "fail-fast" } else { "no fail-fast" };
    eprintln!(
        "{} '{}' ({} jobs, {})",
        paint(BOLD_BLUE, "  Matrix"),
        job_id,
        total_jobs,
        policy
    );
}

pub fn step_output(line: &str) {
    println!("        | {}", line);
}

pub fn step_error(line: &str) {
    eprintln!("{}", paint(RED, &format!("        | {}", line)));
}

pub fn header(message: &str) {
    eprintln!("{}", paint(BOLD, &format!("==> {}", message)));
}
