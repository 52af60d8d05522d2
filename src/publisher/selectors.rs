//! Ordered candidate locators for every step of the posting flow.
//!
//! Instagram's markup drifts between releases; only text- and role-based
//! heuristics survive redesigns. Each step tries its candidates in order and
//! the first visible match wins, so UI drift is handled by editing this
//! table, not the driver logic.

/// One way to locate a UI affordance.
#[derive(Debug, Clone, Copy)]
pub enum Locator {
    /// A CSS selector.
    Css(&'static str),
    /// A visible-text match on elements of the given tag.
    Text { tag: &'static str, needle: &'static str },
}

/// The "create post" affordance on the home page.
pub const CREATE_BUTTON: &[Locator] = &[
    Locator::Css("svg[aria-label='New post']"),
    Locator::Css("a[aria-label='New post']"),
    Locator::Text { tag: "span", needle: "Create" },
    Locator::Text { tag: "a", needle: "Create" },
];

/// The plain-post option in the secondary create menu (vs. the AI option).
pub const CREATE_MENU_POST_OPTION: &[Locator] = &[
    Locator::Css("svg[aria-label='Post']"),
    Locator::Text { tag: "span", needle: "Post" },
];

/// The file input for the image upload.
pub const FILE_INPUT: &[&str] = &[
    "input[type='file'][accept*='image']",
    "form[enctype='multipart/form-data'] input[type='file']",
    "input[type='file']",
];

/// The affordance that reveals the hidden file input.
pub const SELECT_FROM_COMPUTER: &[Locator] = &[
    Locator::Text { tag: "button", needle: "Select from computer" },
    Locator::Text { tag: "button", needle: "Select From Computer" },
];

/// The "next" control in the two-step edit flow.
pub const NEXT_BUTTON: &[Locator] = &[
    Locator::Text { tag: "button", needle: "Next" },
    Locator::Text { tag: "div", needle: "Next" },
];

/// The caption's editable text region.
pub const CAPTION_BOX: &[&str] = &[
    "div[role='textbox'][contenteditable='true']",
    "div[aria-label*='caption' i][contenteditable='true']",
    "textarea[aria-label*='caption' i]",
];

/// The final share control.
pub const SHARE_BUTTON: &[Locator] = &[
    Locator::Text { tag: "button", needle: "Share" },
    Locator::Text { tag: "div", needle: "Share" },
];

/// Upload/processing progress indicators.
pub const PROGRESS_INDICATOR: &[Locator] = &[
    Locator::Css("[role='progressbar']"),
    Locator::Css("svg[aria-label='Loading...']"),
];

/// Post-share confirmation signals. Unreliable: absence is a warning only.
pub const SUCCESS_INDICATOR: &[Locator] = &[
    Locator::Text { tag: "span", needle: "Your post has been shared" },
    Locator::Text { tag: "div", needle: "Post shared" },
    Locator::Css("img[alt='Animated checkmark']"),
];

/// Login form fields, used when cookies are absent or stale.
pub const LOGIN_USERNAME: &str = "input[name='username']";
pub const LOGIN_PASSWORD: &str = "input[name='password']";
pub const LOGIN_SUBMIT: &str = "button[type='submit']";
