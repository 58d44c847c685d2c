//! Command line arguments parsing.
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use clap::Parser;
use netutils::Cidr4;

#[derive(Parser, Debug)]
pub struct SubnetAllocatorArgs {
    /// Parent network to split, e.g. 10.1.0.0/16
    pub parent: Cidr4,
    /// Host bits of each subnet (8 hands out /24s)
    pub host_bits: u8,
    /// Networks never to hand out
    ///
    /// Each must lie inside the parent and cover whole subnets.
    #[arg(short = 'x', long)]
    pub exclude: Vec<Cidr4>,
    /// Subnets already in use elsewhere
    #[arg(short = 'r', long)]
    pub reserve: Vec<Cidr4>,
    /// Number of subnets to allocate
    #[arg(short = 'c', long, default_value = "1")]
    pub count: usize,
    /// Print the allocator state as JSON after allocating
    #[arg(short = 's', long)]
    pub state: bool,
    /// Verbose mode
    #[arg(short = 'v', long)]
    pub verbose: bool,
}
