//! Log line extraction
//!
//! Pulls the new mint and its creator out of program log text. Nothing here
//! fails loudly: a batch that does not match simply yields `None`.

use regex::Regex;
use solana_sdk::pubkey::Pubkey;
use std::str::FromStr;

lazy_static::lazy_static! {
    /// "Initialize mint: <addr>" / "InitializeMint2 <addr>"
    static ref INIT_MINT_PHRASE: Regex =
        Regex::new(r"(?i)\binitiali[sz]e[\s_]*mint2?\b[\s:=]*([1-9A-HJ-NP-Za-km-z]{32,44})")
            .expect("Invalid init mint regex");

    /// "mint: <addr>" / "Mint address = <addr>"
    static ref MINT_FIELD_PHRASE: Regex =
        Regex::new(r"(?i)\bmint(?:\s+address)?\s*[:=]\s*([1-9A-HJ-NP-Za-km-z]{32,44})")
            .expect("Invalid mint field regex");

    static ref SIGNER_LINE: Regex =
        Regex::new(r"(?i)\b(?:signer|signed\s+by|creator|fee\s+payer)\s*[:=]\s*([1-9A-HJ-NP-Za-km-z]{32,44})")
            .expect("Invalid signer regex");

    static ref AUTHORITY_LINE: Regex =
        Regex::new(r"(?i)\b(?:mint\s+)?authority\s*[:=]\s*([1-9A-HJ-NP-Za-km-z]{32,44})")
            .expect("Invalid authority regex");
}

/// Whether any line carries one of the token-initialization markers
pub fn has_init_marker(logs: &[String], markers: &[String]) -> bool {
    logs.iter()
        .any(|line| markers.iter().any(|marker| line.contains(marker.as_str())))
}

/// Candidate mint address, trying the initialize phrasing before the field phrasing
pub fn extract_mint(logs: &[String]) -> Option<String> {
    first_address(logs, &INIT_MINT_PHRASE).or_else(|| first_address(logs, &MINT_FIELD_PHRASE))
}

/// Creator from a signer line, else an authority line
pub fn extract_creator(logs: &[String]) -> Option<String> {
    first_address(logs, &SIGNER_LINE).or_else(|| first_address(logs, &AUTHORITY_LINE))
}

fn first_address(logs: &[String], pattern: &Regex) -> Option<String> {
    logs.iter()
        .filter_map(|line| pattern.captures(line))
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str())
        .find(|candidate| Pubkey::from_str(candidate).is_ok())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINT: &str = "7xKXtg2CW87d97TXJSDpbD5jBkheTqA83TZRuJosgAsU";
    const CREATOR: &str = "9WzDXwBbmkg8ZTbNMqUxvQRAyrZzDsGYdLVL9zYtAWWM";
    const AUTHORITY: &str = "HN7cABqLq46Es1jh92dQQisAq662SmxELLLsHHe4YWrH";

    fn logs(lines: &[&str]) -> Vec<String> {
        lines.iter().map(|l| l.to_string()).collect()
    }

    fn markers() -> Vec<String> {
        vec!["Instruction: InitializeMint".to_string()]
    }

    #[test]
    fn test_marker_detection() {
        let batch = logs(&[
            "Program TokenkegQfeZyiNwAJbNbGKPFXCWuBvf9Ss623VQ5DA invoke [1]",
            "Program log: Instruction: InitializeMint2",
        ]);
        assert!(has_init_marker(&batch, &markers()));

        let transfer = logs(&["Program log: Instruction: Transfer"]);
        assert!(!has_init_marker(&transfer, &markers()));
    }

    #[test]
    fn test_extract_mint_initialize_phrasing() {
        let batch = logs(&[
            "Program log: Instruction: InitializeMint",
            &format!("Program log: Initialize mint: {}", MINT),
        ]);
        assert_eq!(extract_mint(&batch).as_deref(), Some(MINT));
    }

    #[test]
    fn test_extract_mint_field_phrasing() {
        let batch = logs(&[&format!("Program log: Mint address = {}", MINT)]);
        assert_eq!(extract_mint(&batch).as_deref(), Some(MINT));
    }

    #[test]
    fn test_extract_mint_rejects_non_address() {
        let batch = logs(&["Program log: mint: 0OIl0OIl0OIl0OIl0OIl0OIl0OIl0OIl"]);
        assert!(extract_mint(&batch).is_none());
        assert!(extract_mint(&logs(&["Program log: nothing here"])).is_none());
    }

    #[test]
    fn test_creator_prefers_signer_over_authority() {
        let batch = logs(&[
            &format!("Program log: mint authority: {}", AUTHORITY),
            &format!("Program log: signer: {}", CREATOR),
        ]);
        assert_eq!(extract_creator(&batch).as_deref(), Some(CREATOR));
    }

    #[test]
    fn test_creator_falls_back_to_authority() {
        let batch = logs(&[&format!("Program log: authority = {}", AUTHORITY)]);
        assert_eq!(extract_creator(&batch).as_deref(), Some(AUTHORITY));
        assert!(extract_creator(&logs(&["Program log: Instruction: InitializeMint"])).is_none());
    }
}
