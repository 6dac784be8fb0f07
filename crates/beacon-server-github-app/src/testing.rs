// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

use std::sync::OnceLock;

use rsa::pkcs1::EncodeRsaPublicKey;
use rsa::pkcs8::EncodePrivateKey;
use rsa::RsaPrivateKey;

pub(crate) struct TestKeyPair {
	pub(crate) private_pem: String,
	pub(crate) public_pem: String,
}

/// One RSA key pair shared by every test in the crate; generation is slow.
pub(crate) fn test_key_pair() -> &'static TestKeyPair {
	static KEYS: OnceLock<TestKeyPair> = OnceLock::new();
	KEYS.get_or_init(|| {
		let mut rng = rand::thread_rng();
		let private_key = RsaPrivateKey::new(&mut rng, 2048).expect("generate RSA key");
		let public_key = private_key.to_public_key();
		TestKeyPair {
			private_pem: private_key
				.to_pkcs8_pem(rsa::pkcs8::LineEnding::LF)
				.expect("encode private key")
				.to_string(),
			public_pem: public_key
				.to_pkcs1_pem(rsa::pkcs1::LineEnding::LF)
				.expect("encode public key"),
		}
	})
}
