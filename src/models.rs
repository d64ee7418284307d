use serde::{Deserialize, Serialize};

/// Пара токенов и профиль, которые возвращают /auth/login и /auth/refresh
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialPair {
    pub access_token: String,
    pub refresh_token: String,
    /// Срок жизни access token в секундах
    pub expires_in: i64,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub nickname: String,
}

/// Тело POST /auth/login
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

/// Тело POST /auth/refresh
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest {
    pub refresh_token: String,
}

/// Ответ GET /auth/check
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct UsernameCheck {
    pub exists: bool,
}

/// Постраничный ответ бэкенда (records + total)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    #[serde(default = "Vec::new")]
    pub records: Vec<T>,
    #[serde(default)]
    pub total: u64,
    #[serde(default)]
    pub current: Option<u64>,
    #[serde(default)]
    pub pages: Option<u64>,
    #[serde(default)]
    pub size: Option<u64>,
}

impl<T> Page<T> {
    /// Есть ли ещё страницы после текущей
    pub fn has_more(&self) -> bool {
        match (self.current, self.pages) {
            (Some(current), Some(pages)) => current < pages,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Parrot {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    /// Номер кольца (основной ключ поиска)
    pub ring_number: String,
    /// id вида
    #[serde(default)]
    pub species: Option<i64>,
    #[serde(default)]
    pub gender: Option<String>,
    #[serde(default)]
    pub cage_id: Option<i64>,
}

impl Parrot {
    pub fn is_male(&self) -> bool {
        matches!(self.gender.as_deref(), Some("公") | Some("male"))
    }

    pub fn is_female(&self) -> bool {
        matches!(self.gender.as_deref(), Some("母") | Some("female"))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub cage_code: String,
    /// id вида, который бэкенд хранит строкой
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parrot_count: Option<u64>,
}

impl Cage {
    /// id вида, закреплённого за клеткой
    /// Как parseInt: ведущие пробелы, необязательный знак, затем цифры до первого нецифрового символа.
    pub fn species_id(&self) -> Option<i64> {
        let location = self.location.as_deref()?.trim_start();
        let (negative, rest) = match location.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, location.strip_prefix('+').unwrap_or(location)),
        };
        let end = rest
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(rest.len());
        let id: i64 = rest[..end].parse().ok()?;
        Some(if negative { -id } else { id })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Species {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub name: String,
}
