//! Montos de activos fungibles.
//!
//! La aritmética sólo está definida entre montos del mismo token; cualquier
//! mezcla, overflow o underflow es un error tipado (nunca un panic).
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::errors::DomainError;
use crate::identity::PartyAndReference;

/// Código de moneda ("USD", "GBP", ...).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Currency(pub String);

impl Currency {
    pub fn new(code: impl Into<String>) -> Self {
        Currency(code.into())
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Producto respaldado por un emisor concreto.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Issued<P> {
    pub issuer: PartyAndReference,
    pub product: P,
}

impl<P: fmt::Display> fmt::Display for Issued<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} issued by {}", self.product, self.issuer)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Amount<T> {
    pub quantity: u64,
    pub token: T,
}

impl<T: Clone + PartialEq + fmt::Display> Amount<T> {
    pub fn new(quantity: u64, token: T) -> Self {
        Self { quantity, token }
    }

    pub fn zero(token: T) -> Self {
        Self { quantity: 0, token }
    }

    fn same_token(&self, other: &Self) -> Result<(), DomainError> {
        if self.token == other.token {
            Ok(())
        } else {
            Err(DomainError::TokenMismatch { left: self.token.to_string(),
                                             right: other.token.to_string() })
        }
    }

    pub fn checked_add(&self, other: &Self) -> Result<Self, DomainError> {
        self.same_token(other)?;
        let quantity = self.quantity.checked_add(other.quantity).ok_or(DomainError::Overflow)?;
        Ok(Self::new(quantity, self.token.clone()))
    }

    pub fn checked_sub(&self, other: &Self) -> Result<Self, DomainError> {
        self.same_token(other)?;
        let quantity = self.quantity
                           .checked_sub(other.quantity)
                           .ok_or(DomainError::Underflow { have: self.quantity,
                                                           need: other.quantity })?;
        Ok(Self::new(quantity, self.token.clone()))
    }

    pub fn is_zero(&self) -> bool {
        self.quantity == 0
    }
}

impl<P: Clone> Amount<Issued<P>> {
    /// Mismo monto sin la información de emisor.
    pub fn without_issuer(&self) -> Amount<P> {
        Amount { quantity: self.quantity,
                 token: self.token.product.clone() }
    }
}

impl<T: fmt::Display> fmt::Display for Amount<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.quantity, self.token)
    }
}

/// Sumas sobre iteradores de montos.
pub trait AmountSum<T> {
    /// Falla con `EmptySum` si no hay elementos.
    fn sum_or_error(self) -> Result<Amount<T>, DomainError>;
    /// Devuelve cero del token indicado si no hay elementos.
    fn sum_or_zero(self, token: T) -> Result<Amount<T>, DomainError>;
}

impl<'a, T, I> AmountSum<T> for I
    where T: Clone + PartialEq + fmt::Display + 'a,
          I: IntoIterator<Item = &'a Amount<T>>
{
    fn sum_or_error(self) -> Result<Amount<T>, DomainError> {
        let mut iter = self.into_iter();
        let first = iter.next().ok_or(DomainError::EmptySum)?.clone();
        iter.try_fold(first, |acc, a| acc.checked_add(a))
    }

    fn sum_or_zero(self, token: T) -> Result<Amount<T>, DomainError> {
        self.into_iter().try_fold(Amount::zero(token), |acc, a| acc.checked_add(a))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn usd(q: u64) -> Amount<Currency> {
        Amount::new(q, Currency::new("USD"))
    }

    #[test]
    fn mixing_tokens_is_an_error() {
        let gbp = Amount::new(5, Currency::new("GBP"));
        assert!(matches!(usd(1).checked_add(&gbp), Err(DomainError::TokenMismatch { .. })));
    }

    #[test]
    fn overflow_and_underflow_are_typed() {
        assert_eq!(usd(u64::MAX).checked_add(&usd(1)), Err(DomainError::Overflow));
        assert_eq!(usd(3).checked_sub(&usd(4)), Err(DomainError::Underflow { have: 3, need: 4 }));
    }

    #[test]
    fn sums() {
        let v = vec![usd(40), usd(40), usd(40)];
        assert_eq!(v.iter().sum_or_error().unwrap(), usd(120));
        let empty: Vec<Amount<Currency>> = vec![];
        assert_eq!(empty.iter().sum_or_error(), Err(DomainError::EmptySum));
        assert_eq!(empty.iter().sum_or_zero(Currency::new("USD")).unwrap(), usd(0));
    }

    proptest! {
        #[test]
        fn add_then_sub_restores(a in 0u64..u64::MAX / 2, b in 0u64..u64::MAX / 2) {
            let total = usd(a).checked_add(&usd(b)).unwrap();
            prop_assert_eq!(total.checked_sub(&usd(b)).unwrap(), usd(a));
        }
    }
}
