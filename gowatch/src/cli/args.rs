//! Splitting of the arguments after `--`

/// Splits trailing arguments into build arguments and app arguments at the first `--`.
pub fn split_passthrough(args: &[String]) -> (Vec<String>, Vec<String>) {
    match args.iter().position(|a| a == "--") {
        Some(at) => (args[..at].to_vec(), args[at + 1..].to_vec()),
        None => (args.to_vec(), Vec::new()),
    }
}

/// Finds the `-o` value in go build arguments (`-o x`, `-o=x`, `--o x`, `--o=x`).
///
/// The last occurrence wins, as it does for go itself.
pub fn extract_output(build_args: &[String]) -> Option<String> {
    let mut output = None;
    let mut iter = build_args.iter();

    while let Some(arg) = iter.next() {
        let Some(flag) = arg.strip_prefix("--").or_else(|| arg.strip_prefix('-')) else {
            continue;
        };
        if flag == "o" {
            output = iter.next().cloned();
        } else if let Some(value) = flag.strip_prefix("o=") {
            output = Some(value.to_string());
        }
    }

    output.filter(|o| !o.is_empty())
}
