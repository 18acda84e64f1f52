use std::fmt;

use hyper::Method;
use regex_lite as regex;

use super::matcher::{Matcher, RouteMatcher};

#[derive(Debug, PartialEq)]
pub enum RuleError {
    /// 빈 규칙 문자열
    EmptyRule,
    /// 알 수 없는 술어 이름
    UnknownPredicate {
        predicate: String,
    },
    /// 술어 인자 형식 오류
    InvalidArgument {
        predicate: String,
        argument: String,
        reason: String,
    },
    /// 정규식 컴파일 실패
    InvalidRegex {
        pattern: String,
        reason: String,
    },
}

impl fmt::Display for RuleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuleError::EmptyRule =>
                write!(f, "빈 규칙"),
            RuleError::UnknownPredicate { predicate } =>
                write!(f, "알 수 없는 술어: {}", predicate),
            RuleError::InvalidArgument { predicate, argument, reason } =>
                write!(f, "{} 술어의 인자 {} 오류: {}", predicate, argument, reason),
            RuleError::InvalidRegex { pattern, reason } =>
                write!(f, "정규식 {} 컴파일 실패: {}", pattern, reason),
        }
    }
}

impl std::error::Error for RuleError {}

/// 규칙 문자열 하나를 라우트 매처로 컴파일합니다.
///
/// 예: `Host:a.test,b.test;PathPrefix:/api`
pub fn parse_rule(rule: &str) -> Result<RouteMatcher, RuleError> {
    let rule = rule.trim();
    if rule.is_empty() {
        return Err(RuleError::EmptyRule);
    }

    let mut matchers = Vec::new();
    for predicate in rule.split(';') {
        let predicate = predicate.trim();
        if predicate.is_empty() {
            continue;
        }
        matchers.push(parse_predicate(predicate)?);
    }

    if matchers.is_empty() {
        return Err(RuleError::EmptyRule);
    }

    Ok(RouteMatcher::new(matchers, rule.len()))
}

fn parse_predicate(predicate: &str) -> Result<Matcher, RuleError> {
    let (name, args) = predicate
        .split_once(':')
        .ok_or_else(|| RuleError::UnknownPredicate {
            predicate: predicate.to_string(),
        })?;

    match name.trim() {
        "Host" => Ok(Matcher::Host(
            split_args(args).map(|h| h.to_lowercase()).collect(),
        )),
        "HostRegexp" => compile_regex(args.trim()).map(Matcher::HostRegexp),
        "Path" => Ok(Matcher::Path(parse_paths("Path", args)?)),
        "PathStrip" => Ok(Matcher::PathStrip(parse_paths("PathStrip", args)?)),
        "PathPrefix" => Ok(Matcher::PathPrefix(parse_paths("PathPrefix", args)?)),
        "PathPrefixStrip" => Ok(Matcher::PathPrefixStrip(parse_paths("PathPrefixStrip", args)?)),
        "Method" => {
            let mut methods = Vec::new();
            for arg in split_args(args) {
                let method = Method::from_bytes(arg.to_uppercase().as_bytes()).map_err(|_| {
                    RuleError::InvalidArgument {
                        predicate: "Method".to_string(),
                        argument: arg.to_string(),
                        reason: "HTTP 메서드가 아님".to_string(),
                    }
                })?;
                methods.push(method);
            }
            if methods.is_empty() {
                return Err(RuleError::InvalidArgument {
                    predicate: "Method".to_string(),
                    argument: args.to_string(),
                    reason: "메서드 목록이 비어 있음".to_string(),
                });
            }
            Ok(Matcher::Method(methods))
        }
        "Headers" => {
            let pairs = parse_header_pairs("Headers", args)?;
            Ok(Matcher::Headers(pairs))
        }
        "HeadersRegexp" => {
            let mut pairs = Vec::new();
            for (key, value) in parse_header_pairs("HeadersRegexp", args)? {
                pairs.push((key, compile_regex(&value)?));
            }
            Ok(Matcher::HeadersRegexp(pairs))
        }
        other => Err(RuleError::UnknownPredicate {
            predicate: other.to_string(),
        }),
    }
}

fn split_args(args: &str) -> impl Iterator<Item = &str> {
    args.split(',').map(str::trim).filter(|a| !a.is_empty())
}

fn parse_paths(predicate: &str, args: &str) -> Result<Vec<String>, RuleError> {
    let mut paths = Vec::new();
    for arg in split_args(args) {
        if !arg.starts_with('/') {
            return Err(RuleError::InvalidArgument {
                predicate: predicate.to_string(),
                argument: arg.to_string(),
                reason: "경로는 /로 시작해야 함".to_string(),
            });
        }
        paths.push(arg.to_string());
    }
    if paths.is_empty() {
        return Err(RuleError::InvalidArgument {
            predicate: predicate.to_string(),
            argument: args.to_string(),
            reason: "경로 목록이 비어 있음".to_string(),
        });
    }
    Ok(paths)
}

/// `K1:V1,K2:V2` 형식의 헤더 쌍 목록을 파싱합니다.
fn parse_header_pairs(predicate: &str, args: &str) -> Result<Vec<(String, String)>, RuleError> {
    let mut pairs = Vec::new();
    for pair in split_args(args) {
        let (key, value) = pair.split_once(':').ok_or_else(|| RuleError::InvalidArgument {
            predicate: predicate.to_string(),
            argument: pair.to_string(),
            reason: "K:V 형식이 아님".to_string(),
        })?;
        if key.trim().is_empty() {
            return Err(RuleError::InvalidArgument {
                predicate: predicate.to_string(),
                argument: pair.to_string(),
                reason: "헤더 이름이 비어 있음".to_string(),
            });
        }
        pairs.push((key.trim().to_string(), value.trim().to_string()));
    }
    if pairs.is_empty() {
        return Err(RuleError::InvalidArgument {
            predicate: predicate.to_string(),
            argument: args.to_string(),
            reason: "헤더 목록이 비어 있음".to_string(),
        });
    }
    Ok(pairs)
}

fn compile_regex(pattern: &str) -> Result<regex::Regex, RuleError> {
    regex::Regex::new(pattern).map_err(|e| RuleError::InvalidRegex {
        pattern: pattern.to_string(),
        reason: e.to_string(),
    })
}
