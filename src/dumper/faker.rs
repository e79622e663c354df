// ============================================================================
// 匿名化数据生成：faker.<分类>.<方法>(参数) 表达式求值
// ✅ 只能做：解析受限语法 + 查表调用生成函数
// ⛔ 禁止：反射式调用任意方法
// ============================================================================

use std::sync::LazyLock;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use regex::Regex;

use crate::utils::error::{AppError, AppResult};

/// 改写表达式以此前缀开头时视为 faker 调用
pub const FAKER_PREFIX: &str = "faker";

static EXPRESSION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^faker\.(\w+)\.(\w+)\((.*)\)$").unwrap());

type FakerFn = fn(&mut StdRng, &[String]) -> String;

const FIRST_NAMES: &[&str] = &[
    "Anna", "Ben", "Clara", "David", "Emma", "Felix", "Greta", "Hannah", "Jonas", "Lena",
    "Lukas", "Marie", "Noah", "Olivia", "Paul", "Sophie",
];
const LAST_NAMES: &[&str] = &[
    "Becker", "Fischer", "Hoffmann", "Koch", "Meyer", "Müller", "Richter", "Schäfer",
    "Schmidt", "Schneider", "Wagner", "Weber", "Wolf", "Zimmermann",
];
const TITLES: &[&str] = &["Dr.", "Prof.", "Mr.", "Ms."];
const DOMAINS: &[&str] = &["example.com", "example.org", "example.net"];
const STREETS: &[&str] = &[
    "Bahnhofstraße", "Gartenweg", "Hauptstraße", "Kirchplatz", "Lindenallee", "Marktplatz",
    "Schulstraße", "Waldweg",
];
const CITIES: &[&str] = &[
    "Berlin", "Bremen", "Dortmund", "Dresden", "Hamburg", "Köln", "Leipzig", "München",
];
const COUNTRIES: &[&str] = &["DE", "AT", "CH", "NL", "GB", "FR"];
const COMPANY_SUFFIXES: &[&str] = &["GmbH", "AG", "KG", "Ltd.", "Inc."];
const WORDS: &[&str] = &[
    "alias", "consequatur", "aut", "perferendis", "sit", "voluptatem", "accusantium",
    "doloremque", "aperiam", "eaque", "ipsa", "quae", "ab", "illo", "inventore", "veritatis",
];

fn pick(rng: &mut StdRng, items: &[&str]) -> String {
    items.choose(rng).copied().unwrap_or_default().to_string()
}

fn digits(rng: &mut StdRng, count: usize) -> String {
    (0..count)
        .map(|_| char::from(b'0' + rng.gen_range(0..10u8)))
        .collect()
}

fn arg_usize(args: &[String], index: usize, fallback: usize) -> usize {
    args.get(index)
        .and_then(|a| a.parse().ok())
        .unwrap_or(fallback)
}

fn arg_i64(args: &[String], index: usize, fallback: i64) -> i64 {
    args.get(index)
        .and_then(|a| a.parse().ok())
        .unwrap_or(fallback)
}

fn first_name(rng: &mut StdRng, _: &[String]) -> String {
    pick(rng, FIRST_NAMES)
}

fn last_name(rng: &mut StdRng, _: &[String]) -> String {
    pick(rng, LAST_NAMES)
}

fn full_name(rng: &mut StdRng, args: &[String]) -> String {
    format!("{} {}", first_name(rng, args), last_name(rng, args))
}

fn title(rng: &mut StdRng, _: &[String]) -> String {
    pick(rng, TITLES)
}

fn user_name(rng: &mut StdRng, args: &[String]) -> String {
    format!(
        "{}.{}{}",
        first_name(rng, args).to_lowercase(),
        last_name(rng, args).to_lowercase(),
        digits(rng, 2)
    )
}

fn email(rng: &mut StdRng, args: &[String]) -> String {
    format!("{}@{}", user_name(rng, args), pick(rng, DOMAINS))
}

fn domain_name(rng: &mut StdRng, _: &[String]) -> String {
    pick(rng, DOMAINS)
}

fn url(rng: &mut StdRng, args: &[String]) -> String {
    format!("https://{}/{}", domain_name(rng, args), pick(rng, WORDS))
}

fn ipv4(rng: &mut StdRng, _: &[String]) -> String {
    format!(
        "{}.{}.{}.{}",
        rng.gen_range(1..=254u8),
        rng.gen::<u8>(),
        rng.gen::<u8>(),
        rng.gen_range(1..=254u8)
    )
}

fn street_address(rng: &mut StdRng, _: &[String]) -> String {
    format!("{} {}", pick(rng, STREETS), rng.gen_range(1..=200u16))
}

fn city(rng: &mut StdRng, _: &[String]) -> String {
    pick(rng, CITIES)
}

fn postcode(rng: &mut StdRng, _: &[String]) -> String {
    digits(rng, 5)
}

fn country_code(rng: &mut StdRng, _: &[String]) -> String {
    pick(rng, COUNTRIES)
}

fn company(rng: &mut StdRng, args: &[String]) -> String {
    format!("{} {}", last_name(rng, args), pick(rng, COMPANY_SUFFIXES))
}

fn phone_number(rng: &mut StdRng, _: &[String]) -> String {
    format!("+49 {} {}", digits(rng, 3), digits(rng, 7))
}

fn word(rng: &mut StdRng, _: &[String]) -> String {
    pick(rng, WORDS)
}

fn words(rng: &mut StdRng, args: &[String]) -> String {
    let count = arg_usize(args, 0, 3).max(1);
    (0..count)
        .map(|_| pick(rng, WORDS))
        .collect::<Vec<_>>()
        .join(" ")
}

fn sentence(rng: &mut StdRng, args: &[String]) -> String {
    let count = arg_usize(args, 0, 6).max(1);
    let mut text = words(rng, &[count.to_string()]);
    if let Some(first) = text.get(..1) {
        text = format!("{}{}", first.to_uppercase(), &text[1..]);
    }
    text.push('.');
    text
}

fn paragraph(rng: &mut StdRng, args: &[String]) -> String {
    let count = arg_usize(args, 0, 3).max(1);
    (0..count)
        .map(|_| sentence(rng, &[]))
        .collect::<Vec<_>>()
        .join(" ")
}

fn number_between(rng: &mut StdRng, args: &[String]) -> String {
    let low = arg_i64(args, 0, 0);
    let high = arg_i64(args, 1, 9999).max(low);
    rng.gen_range(low..=high).to_string()
}

fn random_digit(rng: &mut StdRng, _: &[String]) -> String {
    rng.gen_range(0..10u8).to_string()
}

/// "分类.方法" → 生成函数
const REGISTRY: &[(&str, FakerFn)] = &[
    ("Person.firstName", first_name),
    ("Person.lastName", last_name),
    ("Person.name", full_name),
    ("Person.title", title),
    ("Internet.email", email),
    ("Internet.safeEmail", email),
    ("Internet.userName", user_name),
    ("Internet.domainName", domain_name),
    ("Internet.url", url),
    ("Internet.ipv4", ipv4),
    ("Address.streetAddress", street_address),
    ("Address.city", city),
    ("Address.postcode", postcode),
    ("Address.countryCode", country_code),
    ("Company.name", company),
    ("Phone.number", phone_number),
    ("Lorem.word", word),
    ("Lorem.words", words),
    ("Lorem.sentence", sentence),
    ("Lorem.paragraph", paragraph),
    ("Number.numberBetween", number_between),
    ("Number.randomDigit", random_digit),
];

fn lookup(category: &str, method: &str) -> Option<FakerFn> {
    let key = format!("{}.{}", category, method);
    REGISTRY
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(&key))
        .map(|(_, f)| *f)
}

fn parse_args(raw: &str) -> Vec<String> {
    if raw.trim().is_empty() {
        return Vec::new();
    }
    raw.split(',')
        .map(|a| a.trim().trim_matches(|c| c == '\'' || c == '"').to_string())
        .collect()
}

pub fn is_faker_expression(value: &str) -> bool {
    value.starts_with(FAKER_PREFIX)
}

/// 带固定种子的生成器，同一种子下输出序列可复现
pub struct Faker {
    rng: StdRng,
}

impl Faker {
    pub fn seeded(seed: u64) -> Self {
        Faker {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// 对完整的 faker 表达式求值
    ///
    /// # 返回
    /// 生成的值；表达式不符合语法或方法未注册时返回 ConfigError
    pub fn evaluate(&mut self, expression: &str) -> AppResult<String> {
        let caps = EXPRESSION_RE.captures(expression.trim()).ok_or_else(|| {
            AppError::ConfigError(format!(
                "无效的 faker 表达式：{}（格式应为 faker.<分类>.<方法>(参数)）",
                expression
            ))
        })?;
        let category = &caps[1];
        let method = &caps[2];
        let generate = lookup(category, method).ok_or_else(|| {
            AppError::ConfigError(format!("未知的 faker 方法：{}.{}", category, method))
        })?;
        Ok(generate(&mut self.rng, &parse_args(&caps[3])))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_evaluate_known_methods() {
        let mut faker = Faker::seeded(7);
        let email = faker.evaluate("faker.Internet.email()").unwrap();
        assert!(email.contains('@'), "{}", email);
        assert!(!email.starts_with(FAKER_PREFIX));

        let n: i64 = faker
            .evaluate("faker.Number.numberBetween(10, 20)")
            .unwrap()
            .parse()
            .unwrap();
        assert!((10..=20).contains(&n));

        let words = faker.evaluate("faker.Lorem.words(4)").unwrap();
        assert_eq!(words.split(' ').count(), 4);
    }

    #[test]
    fn test_method_lookup_is_case_insensitive() {
        let mut faker = Faker::seeded(1);
        assert!(faker.evaluate("faker.internet.Email()").is_ok());
    }

    #[test]
    fn test_invalid_expressions() {
        let mut faker = Faker::seeded(1);
        assert!(faker.evaluate("faker.Internet").is_err());
        assert!(faker.evaluate("faker.Unknown.method()").is_err());
        assert!(faker.evaluate("'literal'").is_err());
    }

    #[test]
    fn test_same_seed_same_sequence() {
        let mut a = Faker::seeded(42);
        let mut b = Faker::seeded(42);
        for _ in 0..10 {
            assert_eq!(
                a.evaluate("faker.Person.name()").unwrap(),
                b.evaluate("faker.Person.name()").unwrap()
            );
        }
    }

    #[test]
    fn test_every_registered_method_produces_output() {
        let mut faker = Faker::seeded(3);
        for (name, _) in REGISTRY {
            let value = faker.evaluate(&format!("faker.{}()", name)).unwrap();
            assert!(!value.is_empty(), "{}", name);
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn prop_number_between_stays_in_range(seed in any::<u64>(), low in -1000i64..1000, span in 0i64..1000) {
            let mut faker = Faker::seeded(seed);
            let high = low + span;
            let value: i64 = faker
                .evaluate(&format!("faker.Number.numberBetween({}, {})", low, high))
                .unwrap()
                .parse()
                .unwrap();
            prop_assert!(value >= low && value <= high);
        }
    }
}
