//! LGPD field masking — spec.md §4.1.
//!
//! CPF (the Brazilian taxpayer ID) is transmitted as `***.***.***-XX`,
//! keeping only the last two digits; CNS (the public-health identifier) and
//! patient name travel unmasked to the tenant scope — masking those for
//! display is the central system's concern, not the agent's.

/// Pure, total, idempotent: `mask_cpf(mask_cpf(x)) == mask_cpf(x)` because
/// the function only ever looks at the trailing two digits of whatever
/// digit string it's given — feeding it an already-masked value extracts
/// the same two digits back out.
pub fn mask_cpf(cpf: &str) -> String {
    let digits: Vec<char> = cpf.chars().filter(|c| c.is_ascii_digit()).collect();
    let last_two: String = if digits.len() >= 2 {
        digits[digits.len() - 2..].iter().collect()
    } else {
        format!("{:0>2}", digits.iter().collect::<String>())
    };
    format!("***.***.***-{last_two}")
}
