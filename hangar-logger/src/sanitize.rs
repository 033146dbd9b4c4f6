//! Function-name sanitisation for log file and tail-buffer keys: path
//! separators are stripped and the result is capped at 50 characters so a
//! malicious or accidental package name can't be used to escape `logs_dir`
//! or produce unreasonably long file names.

const MAX_LEN: usize = 50;

pub fn sanitize_function_name(name: &str) -> String {
    let stripped: String = name.chars().filter(|c| *c != '/' && *c != '\\').collect();
    stripped.chars().take(MAX_LEN).collect()
}
