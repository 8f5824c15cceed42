use std::sync::Arc;

use async_trait::async_trait;

use super::{Authenticator, SaslMechanism};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Step {
    Start,
    UserName,
    Password,
}

/// The LOGIN mechanism: the user name and password are requested in turn.
pub struct Login {
    authenticator: Arc<dyn Authenticator>,
    requires_secure: bool,
    step: Step,
    completed: bool,
    authenticated: bool,
    user: Option<String>,
}

impl Login {
    pub fn new(authenticator: Arc<dyn Authenticator>, requires_secure: bool) -> Self {
        Self {
            authenticator,
            requires_secure,
            step: Step::Start,
            completed: false,
            authenticated: false,
            user: None,
        }
    }
}

#[async_trait]
impl SaslMechanism for Login {
    fn name(&self) -> &'static str {
        "LOGIN"
    }

    fn requires_secure_channel(&self) -> bool {
        self.requires_secure
    }

    fn reset(&mut self) {
        self.step = Step::Start;
        self.completed = false;
        self.authenticated = false;
        self.user = None;
    }

    async fn step(&mut self, client: &[u8]) -> Vec<u8> {
        // An initial response carries the user name.
        if self.step == Step::Start && !client.is_empty() {
            self.step = Step::UserName;
        }

        match self.step {
            Step::Start => {
                self.step = Step::UserName;
                b"Username:".to_vec()
            }
            Step::UserName => {
                self.user = Some(String::from_utf8_lossy(client).into_owned());
                self.step = Step::Password;
                b"Password:".to_vec()
            }
            Step::Password => {
                let password = String::from_utf8_lossy(client);
                let user = self.user.as_deref().unwrap_or_default();

                self.authenticated = !user.is_empty()
                    && self.authenticator.authenticate("", user, &password).await;
                self.completed = true;

                Vec::new()
            }
        }
    }

    fn is_completed(&self) -> bool {
        self.completed
    }

    fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    fn user_name(&self) -> Option<&str> {
        self.user.as_deref()
    }
}
