// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;

use stampvault::currency::{format_eur, parse_amount};
use stampvault::gemini::extract_json;
use stampvault::model::StampDraft;

#[derive(Arbitrary, Debug)]
enum Input<'a> {
    Amount(&'a str),
    ModelReply(&'a str),
}

fuzz_target!(|input: Input| {
    match input {
        Input::Amount(text) => {
            let _ = format_eur(parse_amount(text));
        }
        Input::ModelReply(text) => {
            if let Ok(value) = extract_json(text) {
                let _ = serde_json::from_value::<StampDraft>(value);
            }
        }
    }
});
