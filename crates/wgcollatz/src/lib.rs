#![doc = include_str!("../README.md")]
#![warn(missing_docs)]

pub mod kernel;

pub use kernel::{collatz_steps, WgCollatz, OVERFLOW};

/// Parses a comma-separated list of unsigned integers, discarding blank
/// and non-numeric tokens.
///
/// This is the caller-side input handling of the compute demo; the
/// pipeline itself never parses user input.
pub fn parse_numbers(input: &str) -> Vec<u32> {
    input
        .split(',')
        .filter_map(|token| token.trim().parse::<u32>().ok())
        .collect()
}

#[cfg(test)]
mod test {
    use super::parse_numbers;

    #[test]
    fn parses_comma_separated_numbers() {
        assert_eq!(parse_numbers("1, 4, 3, 295"), vec![1, 4, 3, 295]);
        assert_eq!(parse_numbers("7"), vec![7]);
    }

    #[test]
    fn discards_blank_and_non_numeric_tokens() {
        assert_eq!(parse_numbers("1, two, , 3,"), vec![1, 3]);
        assert_eq!(parse_numbers("-1, 2.5, nan"), Vec::<u32>::new());
        assert_eq!(parse_numbers(""), Vec::<u32>::new());
    }
}
