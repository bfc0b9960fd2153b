//! Data-driven probe lists and phrase tables.
//!
//! Everything heuristic about login handling lives here as plain data so
//! it can be unit-tested without a browser and extended without touching
//! control flow. Phrase matching is error-first: only explicit failure
//! phrases count, because providers render welcome-style copy even on
//! failed attempts.

/// Email/username field probes, most specific first.
pub const EMAIL_SELECTORS: &[&str] = &[
    "input[type=\"email\"]",
    "input[name=\"email\"]",
    "input[name=\"username\"]",
    "input[name=\"login\"]",
    "input[name=\"user\"]",
    "input[name=\"loginfmt\"]",
    "input[autocomplete=\"username\"]",
    "#identifierId",
    "#email",
    "#username",
];

/// Password field probes.
pub const PASSWORD_SELECTORS: &[&str] = &[
    "input[type=\"password\"]",
    "input[name=\"password\"]",
    "input[name=\"passwd\"]",
    "input[name=\"Passwd\"]",
    "input[autocomplete=\"current-password\"]",
    "#password",
];

/// Submit control probes, including the provider-specific buttons.
pub const SUBMIT_SELECTORS: &[&str] = &[
    "button[type=\"submit\"]",
    "input[type=\"submit\"]",
    "#identifierNext",
    "#passwordNext",
    "#idSIButton9",
    "button[name=\"login\"]",
    "#signIn",
    "#login-button",
];

/// Explicit failure copy. A hit anywhere in the page content means the
/// attempt failed, full stop.
pub const FAILURE_PHRASES: &[&str] = &[
    "incorrect password",
    "wrong password",
    "invalid password",
    "incorrect username",
    "invalid username",
    "invalid credentials",
    "invalid email",
    "invalid login",
    "couldn't sign you in",
    "couldn't find your account",
    "can't find your account",
    "we couldn't find an account",
    "account not found",
    "no account found",
    "that account doesn't exist",
    "your account or password is incorrect",
    "password you entered is incorrect",
    "login failed",
    "sign-in failed",
    "sign in failed",
    "authentication failed",
    "unable to sign in",
    "too many failed attempts",
    "account has been locked",
    "account is locked",
    "verification failed",
    "please enter a valid email",
    "credentials do not match",
];

/// Social/OAuth button copy.
pub const OAUTH_PHRASES: &[&str] = &[
    "sign in with google",
    "continue with google",
    "sign in with facebook",
    "continue with facebook",
    "sign in with apple",
    "continue with apple",
    "sign in with github",
    "continue with github",
    "log in with twitter",
];

/// Enterprise SSO copy.
pub const SSO_PHRASES: &[&str] = &[
    "single sign-on",
    "single sign on",
    "continue with sso",
    "log in with sso",
    "use single sign",
    "saml",
    "use your organization",
    "enterprise login",
];

/// Passwordless / magic-link copy.
pub const PASSWORDLESS_PHRASES: &[&str] = &[
    "magic link",
    "passwordless",
    "email me a login link",
    "send me a link",
    "we'll email you a link",
    "one-time code",
    "send code",
];

/// Markers of a framework-rendered single-page app.
pub const SPA_MARKERS: &[&str] = &[
    "data-reactroot",
    "data-reactid",
    "id=\"__next\"",
    "ng-version",
    "ng-app",
    "data-v-app",
    "id=\"root\"",
];

/// URL fragments that place the current page inside an auth flow.
pub const AUTH_PATH_MARKERS: &[&str] = &[
    "login", "signin", "sign-in", "sign_in", "auth", "sso", "session", "oauth",
];

pub const GOOGLE_HOSTS: &[&str] = &["accounts.google.com", "accounts.youtube.com"];

pub const MICROSOFT_HOSTS: &[&str] = &[
    "login.microsoftonline.com",
    "login.live.com",
    "login.windows.net",
];

/// First failure phrase found in the page content, if any.
pub fn find_failure_phrase(content: &str) -> Option<&'static str> {
    let lower = content.to_lowercase();
    FAILURE_PHRASES.iter().find(|p| lower.contains(*p)).copied()
}

pub fn contains_any(content: &str, phrases: &[&'static str]) -> bool {
    let lower = content.to_lowercase();
    phrases.iter().any(|p| lower.contains(p))
}

/// True when the URL's host or path sits on a login/auth/SSO route.
pub fn on_auth_path(url: &str) -> bool {
    let lower = url.to_lowercase();
    AUTH_PATH_MARKERS.iter().any(|m| lower.contains(m))
}
