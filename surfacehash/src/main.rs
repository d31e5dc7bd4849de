use std::process::ExitCode;

use surfacehash::{compute_surface_hash, HashOptions};

fn main() -> ExitCode {
	let mut path = None;
	let mut options = HashOptions::empty();

	for arg in std::env::args().skip(1) {
		match arg.as_str() {
			"--include-all-attributes" => options |= HashOptions::INCLUDE_ALL_ATTRIBUTES,
			_ if path.is_none() => path = Some(arg),
			_ => {
				eprintln!("unexpected argument: {arg}");
				return ExitCode::FAILURE;
			},
		}
	}

	let Some(path) = path else {
		eprintln!("usage: surfacehash <path-to-assembly> [--include-all-attributes]");
		return ExitCode::FAILURE;
	};

	let bytes = match std::fs::read(&path) {
		Ok(bytes) => bytes,
		Err(e) => {
			eprintln!("failed to read {path}: {e}");
			return ExitCode::FAILURE;
		},
	};

	match compute_surface_hash(&bytes, options) {
		Ok(hash) => {
			println!("{hash:016x}");
			ExitCode::SUCCESS
		},
		Err(e) => {
			eprintln!("{e}");
			ExitCode::FAILURE
		},
	}
}
