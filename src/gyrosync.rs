// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright © 2026 Gyrosync contributors

use mimalloc::MiMalloc;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

mod cli;
mod util;

fn main() {
    let opts: cli::Opts = argh::from_env();

    if let Err(e) = util::init_logging(opts.log_file.as_deref()) {
        eprintln!("{}", e);
    }
    log_panics::init();
    ::log::debug!("Gyrosync v{}", env!("CARGO_PKG_VERSION"));

    if let Err(e) = cli::run(opts) {
        ::log::error!("{}", e);
        std::process::exit(1);
    }
}
