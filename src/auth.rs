/// Decides whether a presented secret may run a destructive operation.
///
/// The track service only ever asks this question, so a real credential check
/// can replace [`SharedSecret`] without touching the service.
pub trait Authorizer: Send + Sync {
    fn authorize(&self, secret: Option<&str>) -> bool;
}

/// A single static secret shared by every caller.
#[derive(Clone)]
pub struct SharedSecret {
    secret: String,
}

impl SharedSecret {
    pub fn new(secret: impl Into<String>) -> Self {
        Self { secret: secret.into() }
    }
}

impl Authorizer for SharedSecret {
    fn authorize(&self, secret: Option<&str>) -> bool {
        match secret {
            Some(presented) if !self.secret.is_empty() => {
                constant_time_eq(presented.as_bytes(), self.secret.as_bytes())
            }
            _ => false,
        }
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
