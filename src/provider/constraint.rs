use crate::provider::ProviderError;

/// 서비스 태그에 대한 포함/제외 제약 조건입니다.
///
/// `tag==api`는 해당 태그를 가진 서비스만 포함하고,
/// `tag!=internal`은 해당 태그를 가진 서비스를 제외합니다.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Constraint {
    pub key: String,
    pub must_match: bool,
    pub value: String,
}

impl Constraint {
    pub fn parse(expression: &str) -> Result<Self, ProviderError> {
        let (operator, must_match) = if expression.contains("==") {
            ("==", true)
        } else if expression.contains("!=") {
            ("!=", false)
        } else {
            return Err(ProviderError::InvalidConstraint {
                expression: expression.to_string(),
                reason: "연산자(== 또는 !=) 누락".to_string(),
            });
        };

        let mut parts = expression.splitn(2, operator);
        let key = parts.next().unwrap_or("").trim();
        let value = parts.next().unwrap_or("").trim();

        if key.is_empty() || value.is_empty() {
            return Err(ProviderError::InvalidConstraint {
                expression: expression.to_string(),
                reason: "키 또는 값이 비어 있음".to_string(),
            });
        }

        Ok(Constraint {
            key: key.to_string(),
            must_match,
            value: value.to_string(),
        })
    }

    pub fn parse_all(expressions: &[String]) -> Result<Vec<Self>, ProviderError> {
        expressions.iter().map(|e| Self::parse(e)).collect()
    }

    /// 태그 집합이 이 제약 조건을 통과하는지 검사합니다.
    pub fn matches(&self, tags: &[String]) -> bool {
        let present = tags.iter().any(|t| t == &self.value);
        if self.must_match {
            present
        } else {
            !present
        }
    }
}

impl std::fmt::Display for Constraint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let op = if self.must_match { "==" } else { "!=" };
        write!(f, "{}{}{}", self.key, op, self.value)
    }
}

/// 모든 제약 조건을 통과해야 서비스가 스냅샷에 포함됩니다.
pub fn matches_constraints(constraints: &[Constraint], tags: &[String]) -> bool {
    constraints.iter().all(|c| c.matches(tags))
}
