#![expect(missing_docs, reason = "build scripts don't need docs")]
#![expect(
	clippy::unwrap_used,
	clippy::panic,
	reason = "build scripts are allowed to panic if environment variables are missing, as this is \
	          a build-time error that should be caught during development"
)]

fn main() {
	let target_arch = std::env::var("CARGO_CFG_TARGET_ARCH").unwrap();
	let target_os = std::env::var("CARGO_CFG_TARGET_OS").unwrap();

	// Host builds only ever compile the library (for tests).
	if target_os != "none" {
		return;
	}

	match target_arch.as_str() {
		"x86_64" => {
			println!("cargo:rustc-link-arg-bin=prekern-x86_64=--no-pie");
			println!("cargo:rustc-link-arg-bin=prekern-x86_64=-T");
			println!("cargo:rustc-link-arg-bin=prekern-x86_64=prekern/bin/x86_64.x");
			println!("cargo:rerun-if-changed=bin/x86_64.x");
		}
		_ => {
			panic!("unsupported target architecture: {target_arch}");
		}
	}
}
