//! Command-line front end for [`canadensis_filter_config::optimize`]
//!
//! Reads a list of hexadecimal or decimal 29-bit extended CAN identifiers (one per line, or
//! whitespace-separated) from stdin, and a target filter count from the first command-line
//! argument, and prints the resulting identifier/mask pairs.
//!
//! Usage: `optimize_filters <filter-count> < identifiers.txt`

use std::env;
use std::io::{self, Read};

use canadensis_filter_config::optimize;

fn main() {
    let target_count: usize = env::args()
        .nth(1)
        .expect("usage: optimize_filters <filter-count>")
        .parse()
        .expect("filter count must be a non-negative integer");

    let mut input = String::new();
    io::stdin()
        .read_to_string(&mut input)
        .expect("failed to read identifiers from stdin");

    let ids: Vec<u32> = input
        .split_whitespace()
        .map(|token| {
            if let Some(hex) = token.strip_prefix("0x") {
                u32::from_str_radix(hex, 16).expect("invalid hexadecimal identifier")
            } else {
                token.parse().expect("invalid decimal identifier")
            }
        })
        .collect();

    let filters = optimize(&ids, target_count, 29);
    println!("{} identifiers reduced to {} filters:", ids.len(), filters.len());
    for filter in &filters {
        println!("  id=0x{:08X} mask=0x{:08X}", filter.id(), filter.mask());
    }
}
