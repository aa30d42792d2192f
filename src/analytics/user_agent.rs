//! Local OS and browser detection from User-Agent strings

use woothee::parser::Parser;

const UNKNOWN: &str = "UNKNOWN";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserAgentInfo {
    pub os_name: Option<String>,
    pub browser_name: Option<String>,
}

pub fn parse_user_agent(user_agent: &str) -> UserAgentInfo {
    if user_agent.trim().is_empty() {
        return UserAgentInfo::default();
    }

    let result = Parser::new().parse(user_agent).unwrap_or_default();
    let known = |value: &str| (!value.is_empty() && value != UNKNOWN).then(|| value.to_string());

    UserAgentInfo {
        os_name: known(result.os),
        browser_name: known(result.name),
    }
}
