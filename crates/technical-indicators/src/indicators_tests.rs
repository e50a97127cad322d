#[cfg(test)]
mod tests {
    use super::super::indicators::*;
    use chrono::{TimeZone, Utc};
    use screener_core::Bar;

    // Helper function to create sample price data
    fn sample_prices() -> Vec<f64> {
        vec![
            44.34, 44.09, 44.15, 43.61, 44.33, 44.83, 45.10, 45.42, 45.84, 46.08,
            45.89, 46.03, 45.61, 46.28, 46.28, 46.00, 46.03, 46.41, 46.22, 45.64,
        ]
    }

    // Helper function to create bars with the given closes, constant volume
    fn bars_from_closes(closes: &[f64], volume: f64) -> Vec<Bar> {
        closes
            .iter()
            .enumerate()
            .map(|(i, &close)| Bar {
                timestamp: Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()
                    + chrono::Duration::days(i as i64),
                open: close,
                high: close + 0.5,
                low: close - 0.5,
                close,
                volume,
            })
            .collect()
    }

    #[test]
    fn test_sma_basic() {
        let data = vec![1.0, 2.0, 3.0, 4.0, 5.0];
        let result = sma(&data, 3);

        assert_eq!(result.len(), 3);
        assert!((result[0] - 2.0).abs() < 0.001); // (1+2+3)/3 = 2
        assert!((result[1] - 3.0).abs() < 0.001); // (2+3+4)/3 = 3
        assert!((result[2] - 4.0).abs() < 0.001); // (3+4+5)/3 = 4
    }

    #[test]
    fn test_sma_insufficient_data() {
        let data = vec![1.0, 2.0];
        let result = sma(&data, 5);

        assert_eq!(result.len(), 0);
    }

    #[test]
    fn test_ema_seeded_with_sma() {
        let data = vec![22.0, 24.0, 23.0, 25.0, 26.0];
        let result = ema(&data, 3);

        assert_eq!(result.len(), data.len());
        let seed = (22.0 + 24.0 + 23.0) / 3.0;
        assert!((result[0] - seed).abs() < 0.001);
        assert!((result[2] - seed).abs() < 0.001);
        // Smoothing from index `period` on: (25-23)*0.5+23 = 24, then 25
        assert!((result[3] - 24.0).abs() < 0.001);
        assert!((result[4] - 25.0).abs() < 0.001);
    }

    #[test]
    fn test_ema_insufficient_data() {
        let data = vec![1.0, 2.0];
        let result = ema(&data, 5);

        assert_eq!(result.len(), 0);
    }

    #[test]
    fn test_rsi_range() {
        let prices = sample_prices();
        let result = rsi(&prices, 14);

        assert!(!result.is_empty());
        for &value in &result {
            assert!((0.0..=100.0).contains(&value));
        }
    }

    #[test]
    fn test_rsi_insufficient_data() {
        let data = vec![1.0, 2.0, 3.0];
        let result = rsi(&data, 14);

        assert_eq!(result.len(), 0);
    }

    #[test]
    fn test_rsi_pure_uptrend_saturates() {
        let uptrend: Vec<f64> = (0..30).map(|i| 100.0 + i as f64).collect();
        let result = rsi(&uptrend, 14);

        assert_eq!(*result.last().unwrap(), 100.0);
    }

    #[test]
    fn test_macd_alignment() {
        let prices: Vec<f64> = (0..60).map(|i| 100.0 + (i as f64) * 0.5).collect();
        let result = macd(&prices, 12, 26, 9);

        assert!(!result.macd_line.is_empty());
        assert_eq!(result.macd_line.len(), result.signal_line.len());
        assert_eq!(result.macd_line.len(), result.histogram.len());

        for i in 0..result.histogram.len() {
            let expected = result.macd_line[i] - result.signal_line[i];
            assert!((result.histogram[i] - expected).abs() < 1e-9);
        }
    }

    #[test]
    fn test_macd_uptrend_is_positive() {
        let prices: Vec<f64> = (0..120).map(|i| 100.0 + (i as f64) * 0.5).collect();
        let result = macd(&prices, 12, 26, 9);

        assert!(*result.macd_line.last().unwrap() > 0.0);
        assert!(*result.histogram.last().unwrap() >= 0.0);
    }

    #[test]
    fn test_macd_insufficient_data() {
        let prices = sample_prices();
        let result = macd(&prices, 12, 26, 9);

        assert!(result.macd_line.is_empty());
        assert!(result.signal_line.is_empty());
        assert!(result.histogram.is_empty());
    }

    #[test]
    fn test_atr_positive() {
        let closes: Vec<f64> = (0..30).map(|i| 100.0 + i as f64).collect();
        let bars = bars_from_closes(&closes, 1_000_000.0);
        let result = atr(&bars, 14);

        assert!(!result.is_empty());
        for &value in &result {
            assert!(value > 0.0);
        }
    }

    #[test]
    fn test_atr_insufficient_data() {
        let bars = bars_from_closes(&[100.0, 101.0, 102.0], 1000.0);
        let result = atr(&bars, 14);

        assert_eq!(result.len(), 0);
    }

    #[test]
    fn test_bollinger_bands_ordering() {
        let prices = sample_prices();
        let result = bollinger_bands(&prices, 10, 2.0);

        assert_eq!(result.upper.len(), result.middle.len());
        assert_eq!(result.middle.len(), result.lower.len());
        for i in 0..result.upper.len() {
            assert!(result.upper[i] > result.middle[i]);
            assert!(result.middle[i] > result.lower[i]);
        }
    }

    #[test]
    fn test_bollinger_position_bounds() {
        let prices = sample_prices();
        let result = bollinger_bands(&prices, 10, 2.0);

        let pos = result.position(*prices.last().unwrap()).unwrap();
        assert!((0.0..=1.0).contains(&pos));
        // Far outside the band still clamps
        assert_eq!(result.position(1_000.0).unwrap(), 1.0);
        assert_eq!(result.position(0.0).unwrap(), 0.0);
    }

    #[test]
    fn test_bollinger_position_flat_series() {
        let prices = vec![100.0; 20];
        let result = bollinger_bands(&prices, 10, 2.0);

        assert_eq!(result.position(100.0).unwrap(), 0.5);
    }

    #[test]
    fn test_anchored_vwap_within_range() {
        let closes: Vec<f64> = (0..30).map(|i| 100.0 + i as f64).collect();
        let bars = bars_from_closes(&closes, 1_000_000.0);
        let values = anchored_vwap(&bars, 0);

        assert_eq!(values.len(), bars.len());
        let min_low = bars.iter().map(|b| b.low).fold(f64::INFINITY, f64::min);
        let max_high = bars
            .iter()
            .map(|b| b.high)
            .fold(f64::NEG_INFINITY, f64::max);
        for &v in &values {
            assert!(v >= min_low && v <= max_high);
        }
        // First value is the anchor bar's typical price
        let typical = (bars[0].high + bars[0].low + bars[0].close) / 3.0;
        assert!((values[0] - typical).abs() < 1e-9);
    }

    #[test]
    fn test_anchored_vwap_out_of_bounds_anchor() {
        let bars = bars_from_closes(&[100.0, 101.0], 1000.0);
        assert!(anchored_vwap(&bars, 5).is_empty());
    }

    #[test]
    fn test_find_vwap_anchor_locates_window_low() {
        let closes = vec![10.0, 8.0, 5.0, 7.0, 9.0, 6.0, 5.002, 8.0];
        let bars = bars_from_closes(&closes, 1000.0);

        // Whole-series window: minimum close 5.0 sits at index 2
        assert_eq!(find_vwap_anchor(&bars, 8), Some(2));
        // Shorter window only sees the trailing low near 5.002
        assert_eq!(find_vwap_anchor(&bars, 4), Some(6));
    }

    #[test]
    fn test_find_vwap_anchor_empty() {
        assert_eq!(find_vwap_anchor(&[], 252), None);
    }

    #[test]
    fn test_ref_high_excludes_latest_bar() {
        let closes: Vec<f64> = (0..10).map(|i| 100.0 + i as f64).collect();
        let bars = bars_from_closes(&closes, 1000.0);

        // Highs rise with closes, so the reference is the second-to-last high
        let expected = bars[bars.len() - 2].high;
        assert_eq!(ref_high(&bars, 5), Some(expected));
        assert_eq!(ref_high(&bars, 20), None);
    }

    #[test]
    fn test_volume_multiple_flat_and_spike() {
        let closes: Vec<f64> = (0..25).map(|i| 100.0 + i as f64).collect();
        let mut bars = bars_from_closes(&closes, 500_000.0);
        assert!((volume_multiple(&bars).unwrap() - 1.0).abs() < 1e-9);

        bars.last_mut().unwrap().volume = 1_500_000.0;
        assert!((volume_multiple(&bars).unwrap() - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_volume_multiple_insufficient_data() {
        let bars = bars_from_closes(&[100.0; 10], 1000.0);
        assert_eq!(volume_multiple(&bars), None);
    }

    #[test]
    fn test_volume_continuity_ratio() {
        let closes: Vec<f64> = (0..21).map(|i| 100.0 + i as f64).collect();
        let mut bars = bars_from_closes(&closes, 100.0);
        // Equal volumes never exceed the mean
        assert_eq!(volume_continuity_ratio(&bars), Some(0.0));

        // Boost the last 10 bars above the 20-bar mean
        let len = bars.len();
        for bar in &mut bars[len - 10..] {
            bar.volume = 150.0;
        }
        assert_eq!(volume_continuity_ratio(&bars), Some(1.0));
    }
}
