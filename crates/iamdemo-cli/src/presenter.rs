use iamdemo_core::{Presenter, Profile};

/// Prints the page's visible effects to the terminal.
///
/// Alerts and affordance changes go to stderr so stdout only carries the
/// profile and API output.
pub struct TerminalPresenter;

impl Presenter for TerminalPresenter {
    fn alert(&self, message: &str) {
        eprintln!("!! {}", message);
    }

    fn set_authenticated(&self, authenticated: bool) {
        if authenticated {
            eprintln!("Logged in. Run `iamdemo logout` to log out.");
        } else {
            eprintln!("Not logged in. Run `iamdemo login` to log in.");
        }
    }

    fn show_profile(&self, profile: &Profile) {
        let details = serde_json::to_string_pretty(profile).unwrap_or_default();
        println!(
            "Profile: {}\nPicture: {}\n{}",
            profile.nickname, profile.picture, details
        );
    }

    fn show_api_result(&self, rendered: &str) {
        println!("API result:\n{}", rendered);
    }
}
