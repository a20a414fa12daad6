//! 配置中心内部行为测试
