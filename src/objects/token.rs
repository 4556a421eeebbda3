//! Interned names for property keys and signal names

use std::cell::RefCell;
use std::collections::HashMap;

/// A small comparable handle standing in for a name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Token(u32);

impl Token {
    /// Numeric value of the token
    pub fn id(self) -> u32 {
        self.0
    }
}

#[derive(Debug, Default)]
struct TokensInner {
    by_name: HashMap<String, Token>,
    names: Vec<String>,
}

/// Name interner shared by a registry and all of its classes
#[derive(Debug, Default)]
pub struct Tokens {
    inner: RefCell<TokensInner>,
}

impl Tokens {
    /// Create an empty token table
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the token for a name, allocating one if the name is new
    pub fn intern(&self, name: &str) -> Token {
        if let Some(token) = self.lookup(name) {
            return token;
        }

        let mut inner = self.inner.borrow_mut();
        let token = Token(inner.names.len() as u32);
        inner.names.push(name.to_string());
        inner.by_name.insert(name.to_string(), token);
        token
    }

    /// Get the token for a name without allocating.
    /// A name nobody interned yet cannot name anything, so `None` is a miss.
    pub fn lookup(&self, name: &str) -> Option<Token> {
        self.inner.borrow().by_name.get(name).copied()
    }

    /// Resolve a token back to its name
    pub fn name(&self, token: Token) -> Option<String> {
        self.inner.borrow().names.get(token.0 as usize).cloned()
    }

    /// Number of interned names
    pub fn len(&self) -> usize {
        self.inner.borrow().names.len()
    }

    /// Check if nothing was interned yet
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
