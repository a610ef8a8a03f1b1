use serde::{Deserialize, Serialize};

/// Counter styles available to custom entry prefixes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CounterStyle {
    #[default]
    Decimal,
    RomanUpper,
    AlphaUpper,
    ChineseSimple,
}

/// Render `n` in the given prefix-numbering style.
///
/// Values a style cannot express (zero for roman and alpha, more than 26 letters,
/// Chinese numerals above one hundred) fall back to decimal digits.
pub fn convert(n: u32, style: CounterStyle) -> String {
    match style {
        CounterStyle::Decimal => n.to_string(),
        CounterStyle::RomanUpper => to_roman(n).unwrap_or_else(|| n.to_string()),
        CounterStyle::AlphaUpper => match n {
            1..=26 => char::from(b'A' + (n - 1) as u8).to_string(),
            _ => n.to_string(),
        },
        CounterStyle::ChineseSimple => to_chinese(n),
    }
}

/// Upper-case roman numeral, `None` for zero.
pub fn to_roman(mut n: u32) -> Option<String> {
    if n == 0 {
        return None;
    }

    let values = [
        (1000, "M"),
        (900, "CM"),
        (500, "D"),
        (400, "CD"),
        (100, "C"),
        (90, "XC"),
        (50, "L"),
        (40, "XL"),
        (10, "X"),
        (9, "IX"),
        (5, "V"),
        (4, "IV"),
        (1, "I"),
    ];

    let mut result = String::new();
    for (value, numeral) in values {
        while n >= value {
            result.push_str(numeral);
            n -= value;
        }
    }
    Some(result)
}

/// Upper-case page-label letters: A..Z, then AA..ZZ, AAA..., `None` for zero.
pub fn to_alpha(n: u32) -> Option<String> {
    if n == 0 {
        return None;
    }
    let letter = char::from(b'A' + ((n - 1) % 26) as u8);
    let count = ((n - 1) / 26 + 1) as usize;
    Some(letter.to_string().repeat(count))
}

const CHINESE_DIGITS: [&str; 10] = ["零", "一", "二", "三", "四", "五", "六", "七", "八", "九"];

fn to_chinese(n: u32) -> String {
    match n {
        0..=9 => CHINESE_DIGITS[n as usize].to_string(),
        10 => "十".to_string(),
        11..=19 => format!("十{}", CHINESE_DIGITS[(n % 10) as usize]),
        20..=99 => {
            let tens = CHINESE_DIGITS[(n / 10) as usize];
            match n % 10 {
                0 => format!("{}十", tens),
                ones => format!("{}十{}", tens, CHINESE_DIGITS[ones as usize]),
            }
        }
        100 => "一百".to_string(),
        _ => n.to_string(),
    }
}
