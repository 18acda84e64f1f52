//! 텍스트 규칙을 요청 매처로 컴파일하는 모듈입니다.
//!
//! 규칙 문법은 `Predicate:arg[,arg...]`를 `;`로 연결한 AND 조합입니다.
//! 라우트의 매처는 술어들의 논리곱, 프론트엔드의 매처는 라우트들의
//! 논리합입니다.

mod matcher;
mod parser;

pub use matcher::{request_host, FrontendMatcher, MatchOutcome, Matcher, RouteMatcher};
pub use parser::{parse_rule, RuleError};
