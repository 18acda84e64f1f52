use hyper::{header, Method, Request};
use regex_lite as regex;

/// 규칙 하나에서 컴파일된 단일 술어입니다.
#[derive(Debug, Clone)]
pub enum Matcher {
    Host(Vec<String>),
    HostRegexp(regex::Regex),
    Path(Vec<String>),
    PathStrip(Vec<String>),
    PathPrefix(Vec<String>),
    PathPrefixStrip(Vec<String>),
    Method(Vec<Method>),
    Headers(Vec<(String, String)>),
    HeadersRegexp(Vec<(String, regex::Regex)>),
}

/// 매칭 성공 시의 부가 정보입니다. Strip 계열 술어가 매칭되면
/// 포워딩 전에 제거할 접두사가 실립니다.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MatchOutcome {
    pub strip_prefix: Option<String>,
}

impl Matcher {
    /// 요청이 이 술어를 만족하는지 평가합니다.
    /// Strip 계열이면 매칭된 접두사를 `outcome`에 기록합니다.
    fn matches<B>(&self, req: &Request<B>, outcome: &mut MatchOutcome) -> bool {
        match self {
            Matcher::Host(hosts) => match request_host(req) {
                Some(host) => hosts.iter().any(|h| h == &host),
                None => false,
            },
            Matcher::HostRegexp(pattern) => match request_host(req) {
                Some(host) => pattern.is_match(&host),
                None => false,
            },
            Matcher::Path(paths) => paths.iter().any(|p| p == req.uri().path()),
            Matcher::PathStrip(paths) => {
                for path in paths {
                    if path == req.uri().path() {
                        outcome.strip_prefix = Some(path.clone());
                        return true;
                    }
                }
                false
            }
            Matcher::PathPrefix(prefixes) => prefixes
                .iter()
                .any(|p| prefix_matches(p, req.uri().path())),
            Matcher::PathPrefixStrip(prefixes) => {
                for prefix in prefixes {
                    if prefix_matches(prefix, req.uri().path()) {
                        outcome.strip_prefix = Some(prefix.clone());
                        return true;
                    }
                }
                false
            }
            Matcher::Method(methods) => methods.iter().any(|m| m == req.method()),
            Matcher::Headers(pairs) => pairs.iter().all(|(key, value)| {
                req.headers()
                    .get(key)
                    .and_then(|v| v.to_str().ok())
                    .map(|v| v == value)
                    .unwrap_or(false)
            }),
            Matcher::HeadersRegexp(pairs) => pairs.iter().all(|(key, pattern)| {
                req.headers()
                    .get(key)
                    .and_then(|v| v.to_str().ok())
                    .map(|v| pattern.is_match(v))
                    .unwrap_or(false)
            }),
        }
    }
}

/// 접두사 매칭. 경로 구분자 경계를 존중합니다.
/// `/api`는 `/api`, `/api/`, `/api/v1`에 매칭되지만 `/apiv2`에는 매칭되지 않습니다.
fn prefix_matches(prefix: &str, path: &str) -> bool {
    if prefix == "/" {
        return true;
    }
    let prefix = prefix.trim_end_matches('/');
    path == prefix || path.starts_with(&format!("{}/", prefix))
}

/// 요청에서 호스트를 추출합니다. 소문자로 정규화하고 포트를 제거합니다.
/// HTTP/2 요청은 Host 헤더 대신 URI authority를 사용할 수 있습니다.
pub fn request_host<B>(req: &Request<B>) -> Option<String> {
    let raw = req
        .headers()
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .or_else(|| req.uri().authority().map(|a| a.as_str()))?;

    let host = raw.rsplit_once(':').map_or(raw, |(h, port)| {
        // "host:port"만 포트로 취급, IPv6 리터럴 내부 콜론 보호
        if port.chars().all(|c| c.is_ascii_digit()) && !h.is_empty() {
            h
        } else {
            raw
        }
    });

    Some(host.trim_end_matches('.').to_lowercase())
}

/// 한 라우트의 매처: 술어들의 논리곱입니다.
#[derive(Debug, Clone)]
pub struct RouteMatcher {
    matchers: Vec<Matcher>,
    rule_len: usize,
}

impl RouteMatcher {
    pub fn new(matchers: Vec<Matcher>, rule_len: usize) -> Self {
        Self { matchers, rule_len }
    }

    pub fn matchers(&self) -> &[Matcher] {
        &self.matchers
    }

    pub fn rule_len(&self) -> usize {
        self.rule_len
    }

    pub fn matches<B>(&self, req: &Request<B>) -> Option<MatchOutcome> {
        let mut outcome = MatchOutcome::default();
        for matcher in &self.matchers {
            if !matcher.matches(req, &mut outcome) {
                return None;
            }
        }
        Some(outcome)
    }
}

/// 한 프론트엔드의 매처: 라우트들의 논리합입니다.
#[derive(Debug, Clone)]
pub struct FrontendMatcher {
    routes: Vec<RouteMatcher>,
}

impl FrontendMatcher {
    pub fn new(routes: Vec<RouteMatcher>) -> Self {
        Self { routes }
    }

    /// 가장 긴 라우트 규칙 길이. 우선순위 동률 해소에 사용됩니다.
    pub fn rule_len(&self) -> usize {
        self.routes.iter().map(RouteMatcher::rule_len).max().unwrap_or(0)
    }

    pub fn matches<B>(&self, req: &Request<B>) -> Option<MatchOutcome> {
        self.routes.iter().find_map(|route| route.matches(req))
    }
}
