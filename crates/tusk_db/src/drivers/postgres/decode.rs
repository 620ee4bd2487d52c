//! Text renderings of PostgreSQL binary values that have no matching Rust type.
//!
//! Each newtype reads the binary wire format of one type and produces the
//! text PostgreSQL itself would print (`DateStyle`/`IntervalStyle` at their
//! defaults). MONEY is the exception: it renders as a plain decimal with two
//! fractional digits, because the server's currency format depends on
//! `lc_monetary`.

use std::error::Error;
use std::fmt::Write as _;
use std::net::{Ipv4Addr, Ipv6Addr};
use tokio_postgres::types::{FromSql, Type};

type DecodeResult<T> = Result<T, Box<dyn Error + Sync + Send>>;

const NUMERIC_NEG: u16 = 0x4000;
const NUMERIC_NAN: u16 = 0xC000;
const NUMERIC_PINF: u16 = 0xD000;
const NUMERIC_NINF: u16 = 0xF000;

const PGSQL_AF_INET: u8 = 2;
const PGSQL_AF_INET6: u8 = 3;

const USECS_PER_SEC: i64 = 1_000_000;

/// Big-endian reader that fails instead of panicking on short input.
struct Wire<'a>(&'a [u8]);

impl<'a> Wire<'a> {
    fn take<const N: usize>(&mut self) -> DecodeResult<[u8; N]> {
        if self.0.len() < N {
            return Err("truncated value".into());
        }
        let (head, rest) = self.0.split_at(N);
        self.0 = rest;
        let mut out = [0u8; N];
        out.copy_from_slice(head);
        Ok(out)
    }

    fn u8(&mut self) -> DecodeResult<u8> {
        Ok(self.take::<1>()?[0])
    }

    fn i16(&mut self) -> DecodeResult<i16> {
        Ok(i16::from_be_bytes(self.take()?))
    }

    fn u16(&mut self) -> DecodeResult<u16> {
        Ok(u16::from_be_bytes(self.take()?))
    }

    fn i32(&mut self) -> DecodeResult<i32> {
        Ok(i32::from_be_bytes(self.take()?))
    }

    fn i64(&mut self) -> DecodeResult<i64> {
        Ok(i64::from_be_bytes(self.take()?))
    }

    fn f64(&mut self) -> DecodeResult<f64> {
        Ok(f64::from_be_bytes(self.take()?))
    }

    fn rest(&self) -> &'a [u8] {
        self.0
    }
}

/// NUMERIC at full precision, e.g. `"100000000000000000000000000000000"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) struct NumericText(pub String);

impl<'a> FromSql<'a> for NumericText {
    fn from_sql(_ty: &Type, raw: &'a [u8]) -> DecodeResult<Self> {
        let mut wire = Wire(raw);
        let ndigits = wire.i16()?;
        let weight = wire.i16()? as i32;
        let sign = wire.u16()?;
        let dscale = wire.u16()? as usize;

        match sign {
            NUMERIC_NAN => return Ok(Self("NaN".into())),
            NUMERIC_PINF => return Ok(Self("Infinity".into())),
            NUMERIC_NINF => return Ok(Self("-Infinity".into())),
            _ => {}
        }

        let digits = (0..ndigits.max(0)).map(|_| wire.i16()).collect::<DecodeResult<Vec<i16>>>()?;
        // Digit k is worth 10000^(weight - k).
        let digit = |k: i32| -> i16 {
            usize::try_from(k).ok().and_then(|k| digits.get(k).copied()).unwrap_or(0)
        };

        let mut text = String::new();
        if sign == NUMERIC_NEG && digits.iter().any(|&d| d != 0) {
            text.push('-');
        }
        if weight < 0 {
            text.push('0');
        } else {
            let _ = write!(text, "{}", digit(0));
            for k in 1..=weight {
                let _ = write!(text, "{:04}", digit(k));
            }
        }

        if dscale > 0 {
            let mut fraction = String::with_capacity(dscale + 4);
            let mut k = weight + 1;
            while fraction.len() < dscale {
                let _ = write!(fraction, "{:04}", digit(k));
                k += 1;
            }
            fraction.truncate(dscale);
            text.push('.');
            text.push_str(&fraction);
        }
        Ok(Self(text))
    }

    fn accepts(ty: &Type) -> bool {
        *ty == Type::NUMERIC
    }
}

fn plural(value: i64, unit: &str) -> String {
    if value == 1 {
        format!("{value} {unit}")
    } else {
        format!("{value} {unit}s")
    }
}

/// `HH:MM:SS` with a trimmed fractional part, for a non-negative microsecond count.
fn clock(micros: u64) -> String {
    let secs = micros / USECS_PER_SEC as u64;
    let frac = micros % USECS_PER_SEC as u64;
    let mut text = format!("{:02}:{:02}:{:02}", secs / 3600, secs / 60 % 60, secs % 60);
    if frac > 0 {
        let digits = format!("{frac:06}");
        text.push('.');
        text.push_str(digits.trim_end_matches('0'));
    }
    text
}

/// INTERVAL in the `postgres` output style, e.g. `"1 year 2 mons -3 days +04:05:06"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) struct IntervalText(pub String);

impl<'a> FromSql<'a> for IntervalText {
    fn from_sql(_ty: &Type, raw: &'a [u8]) -> DecodeResult<Self> {
        let mut wire = Wire(raw);
        let micros = wire.i64()?;
        let days = wire.i32()? as i64;
        let months = wire.i32()? as i64;

        let mut parts: Vec<String> = Vec::new();
        let mut seen_negative = false;
        for (value, unit) in [(months / 12, "year"), (months % 12, "mon"), (days, "day")] {
            if value == 0 {
                continue;
            }
            let sign = if value > 0 && seen_negative { "+" } else { "" };
            parts.push(format!("{sign}{}", plural(value, unit)));
            seen_negative |= value < 0;
        }

        if micros != 0 || parts.is_empty() {
            let sign = if micros < 0 {
                "-"
            } else if seen_negative {
                "+"
            } else {
                ""
            };
            parts.push(format!("{sign}{}", clock(micros.unsigned_abs())));
        }
        Ok(Self(parts.join(" ")))
    }

    fn accepts(ty: &Type) -> bool {
        *ty == Type::INTERVAL
    }
}

/// MONEY as a plain decimal, e.g. `"-12.05"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) struct MoneyText(pub String);

impl<'a> FromSql<'a> for MoneyText {
    fn from_sql(_ty: &Type, raw: &'a [u8]) -> DecodeResult<Self> {
        let cents = Wire(raw).i64()?;
        let sign = if cents < 0 { "-" } else { "" };
        let abs = cents.unsigned_abs();
        Ok(Self(format!("{sign}{}.{:02}", abs / 100, abs % 100)))
    }

    fn accepts(ty: &Type) -> bool {
        *ty == Type::MONEY
    }
}

/// INET or CIDR, e.g. `"10.0.0.1"`, `"10.0.0.0/8"`, `"::1"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) struct InetText(pub String);

impl<'a> FromSql<'a> for InetText {
    fn from_sql(_ty: &Type, raw: &'a [u8]) -> DecodeResult<Self> {
        let mut wire = Wire(raw);
        let family = wire.u8()?;
        let bits = wire.u8()?;
        let is_cidr = wire.u8()? != 0;
        let len = wire.u8()? as usize;
        let addr = wire.rest();
        if addr.len() != len {
            return Err("address length mismatch".into());
        }

        let (text, full) = match (family, addr) {
            (PGSQL_AF_INET, &[a, b, c, d]) => (Ipv4Addr::new(a, b, c, d).to_string(), 32),
            (PGSQL_AF_INET6, addr) if addr.len() == 16 => {
                let mut octets = [0u8; 16];
                octets.copy_from_slice(addr);
                (Ipv6Addr::from(octets).to_string(), 128)
            }
            _ => return Err(format!("unknown address family {family}").into()),
        };

        if is_cidr || bits != full {
            Ok(Self(format!("{text}/{bits}")))
        } else {
            Ok(Self(text))
        }
    }

    fn accepts(ty: &Type) -> bool {
        *ty == Type::INET || *ty == Type::CIDR
    }
}

/// MACADDR or MACADDR8 as colon-separated lowercase hex.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) struct MacAddrText(pub String);

impl<'a> FromSql<'a> for MacAddrText {
    fn from_sql(ty: &Type, raw: &'a [u8]) -> DecodeResult<Self> {
        let expected = if *ty == Type::MACADDR8 { 8 } else { 6 };
        if raw.len() != expected {
            return Err("MAC address length mismatch".into());
        }
        let parts: Vec<String> = raw.iter().map(|b| format!("{b:02x}")).collect();
        Ok(Self(parts.join(":")))
    }

    fn accepts(ty: &Type) -> bool {
        *ty == Type::MACADDR || *ty == Type::MACADDR8
    }
}

/// TIMETZ, e.g. `"04:05:06.5+02"` or `"23:00:00-05:30"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) struct TimeTzText(pub String);

impl<'a> FromSql<'a> for TimeTzText {
    fn from_sql(_ty: &Type, raw: &'a [u8]) -> DecodeResult<Self> {
        let mut wire = Wire(raw);
        let micros = wire.i64()?;
        // Stored as seconds west of UTC.
        let zone = wire.i32()?;

        let mut text = clock(micros.unsigned_abs());
        let east = -(zone as i64);
        text.push(if east >= 0 { '+' } else { '-' });
        let east = east.unsigned_abs();
        let _ = write!(text, "{:02}", east / 3600);
        if east % 3600 != 0 {
            let _ = write!(text, ":{:02}", east / 60 % 60);
            if east % 60 != 0 {
                let _ = write!(text, ":{:02}", east % 60);
            }
        }
        Ok(Self(text))
    }

    fn accepts(ty: &Type) -> bool {
        *ty == Type::TIMETZ
    }
}

/// POINT as `"(x,y)"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) struct PointText(pub String);

impl<'a> FromSql<'a> for PointText {
    fn from_sql(_ty: &Type, raw: &'a [u8]) -> DecodeResult<Self> {
        let mut wire = Wire(raw);
        let x = wire.f64()?;
        let y = wire.f64()?;
        Ok(Self(format!("({x},{y})")))
    }

    fn accepts(ty: &Type) -> bool {
        *ty == Type::POINT
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn numeric(ndigits: i16, weight: i16, sign: u16, dscale: u16, digits: &[i16]) -> Vec<u8> {
        let mut raw = Vec::new();
        raw.extend_from_slice(&ndigits.to_be_bytes());
        raw.extend_from_slice(&weight.to_be_bytes());
        raw.extend_from_slice(&sign.to_be_bytes());
        raw.extend_from_slice(&dscale.to_be_bytes());
        for d in digits {
            raw.extend_from_slice(&d.to_be_bytes());
        }
        raw
    }

    fn decode_numeric(raw: &[u8]) -> String {
        NumericText::from_sql(&Type::NUMERIC, raw).unwrap().0
    }

    #[test]
    fn test_numeric_beyond_128_bits_keeps_every_digit() {
        let raw = [0, 1, 0, 8, 0, 0, 0, 0, 0, 1];
        assert_eq!(decode_numeric(&raw), format!("1{}", "0".repeat(32)));

        let huge = numeric(2, 20, 0, 0, &[9999, 1]);
        assert_eq!(decode_numeric(&huge), format!("99990001{}", "0".repeat(76)));
    }

    #[test]
    fn test_numeric_fractions_and_signs() {
        assert_eq!(decode_numeric(&numeric(2, 0, 0, 3, &[12, 3400])), "12.340");
        assert_eq!(decode_numeric(&numeric(1, -1, NUMERIC_NEG, 4, &[12])), "-0.0012");
        assert_eq!(decode_numeric(&numeric(1, -2, 0, 6, &[5])), "0.000000");
        assert_eq!(decode_numeric(&numeric(0, 0, 0, 2, &[])), "0.00");
        assert_eq!(decode_numeric(&numeric(0, 0, NUMERIC_NAN, 0, &[])), "NaN");
        assert_eq!(decode_numeric(&numeric(0, 0, NUMERIC_NINF, 0, &[])), "-Infinity");
    }

    #[test]
    fn test_truncated_numeric_is_an_error() {
        assert!(NumericText::from_sql(&Type::NUMERIC, &[0, 2, 0, 0]).is_err());
        assert!(NumericText::from_sql(&Type::NUMERIC, &numeric(2, 0, 0, 0, &[1])).is_err());
    }

    fn interval(micros: i64, days: i32, months: i32) -> String {
        let mut raw = Vec::new();
        raw.extend_from_slice(&micros.to_be_bytes());
        raw.extend_from_slice(&days.to_be_bytes());
        raw.extend_from_slice(&months.to_be_bytes());
        IntervalText::from_sql(&Type::INTERVAL, &raw).unwrap().0
    }

    #[test]
    fn test_interval_matches_server_output() {
        assert_eq!(interval(0, 0, 0), "00:00:00");
        assert_eq!(interval(0, 3, 14), "1 year 2 mons 3 days");
        assert_eq!(interval(14_706_500_000, 1, 0), "1 day 04:05:06.5");
        assert_eq!(interval(3_600_000_000, -1, 0), "-1 days +01:00:00");
        assert_eq!(interval(-1_000_000, 0, 0), "-00:00:01");
        assert_eq!(interval(0, 2, -1), "-1 mons +2 days");
        assert_eq!(interval(90_000_000_000, 0, 0), "25:00:00");
    }

    #[test]
    fn test_money_inet_mac() {
        let money = MoneyText::from_sql(&Type::MONEY, &(-1205_i64).to_be_bytes()).unwrap();
        assert_eq!(money.0, "-12.05");

        let host = InetText::from_sql(&Type::INET, &[2, 32, 0, 4, 10, 0, 0, 1]).unwrap();
        assert_eq!(host.0, "10.0.0.1");
        let net = InetText::from_sql(&Type::CIDR, &[2, 8, 1, 4, 10, 0, 0, 0]).unwrap();
        assert_eq!(net.0, "10.0.0.0/8");
        let mut v6 = vec![3, 128, 0, 16];
        v6.extend_from_slice(&Ipv6Addr::LOCALHOST.octets());
        assert_eq!(InetText::from_sql(&Type::INET, &v6).unwrap().0, "::1");
        assert!(InetText::from_sql(&Type::INET, &[2, 32, 0, 4, 10, 0]).is_err());

        let mac = MacAddrText::from_sql(&Type::MACADDR, &[0x08, 0, 0x2b, 1, 2, 3]).unwrap();
        assert_eq!(mac.0, "08:00:2b:01:02:03");
    }

    #[test]
    fn test_timetz_and_point() {
        let mut raw = 14_706_500_000_i64.to_be_bytes().to_vec();
        raw.extend_from_slice(&(-7200_i32).to_be_bytes());
        assert_eq!(TimeTzText::from_sql(&Type::TIMETZ, &raw).unwrap().0, "04:05:06.5+02");

        let mut raw = 82_800_000_000_i64.to_be_bytes().to_vec();
        raw.extend_from_slice(&19_800_i32.to_be_bytes());
        assert_eq!(TimeTzText::from_sql(&Type::TIMETZ, &raw).unwrap().0, "23:00:00-05:30");

        let mut raw = 1.5_f64.to_be_bytes().to_vec();
        raw.extend_from_slice(&(-2.0_f64).to_be_bytes());
        assert_eq!(PointText::from_sql(&Type::POINT, &raw).unwrap().0, "(1.5,-2)");
    }
}
